use std::sync::Arc;

use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tracing_subscriber::EnvFilter;

use agora_api::{
    config::Config,
    db,
    mail::{LogTransport, MailTransport, Mailer, SmtpTransport},
    router, tokens, AppState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agora_api=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;

    let pool = db::open_pool(&config.database_path)?;
    db::run_migrations(&pool)?;
    std::fs::create_dir_all(&config.img_upload_dir)?;

    if config.cert_file.is_some() || config.cert_key_file.is_some() {
        tracing::warn!("CERT_FILE is set but TLS is expected to terminate at the reverse proxy");
    }
    let transport: Arc<dyn MailTransport> = match &config.smtp {
        Some(smtp) => {
            tracing::info!(host = %smtp.host, port = smtp.port, "SMTP relay configured");
            Arc::new(SmtpTransport::new(smtp)?)
        }
        None => {
            tracing::warn!("SMTP is not configured, outgoing mail is only logged");
            Arc::new(LogTransport)
        }
    };
    let mailer = Mailer::spawn(transport);
    tokens::spawn_purge(pool.clone());

    let cors = CorsLayer::new()
        .allow_origin(config.cors_origin.parse::<axum::http::HeaderValue>()?)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    let addr = format!("0.0.0.0:{}", config.port);
    let state = AppState {
        db: pool,
        config: Arc::new(config),
        mailer,
    };
    let app = router(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown requested");
}
