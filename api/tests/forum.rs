mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::TestApp;

#[tokio::test]
async fn vote_cycle_ends_on_a_downvote() {
    let app = TestApp::new().await;
    let alice = app.member("alice").await;
    app.create_thread(&alice, "general").await;
    let post = app.send_message(&alice, "general", "hello").await;

    for action in ["upvoteMessage", "upvoteMessage"] {
        let reply = app
            .action(&alice, "general", action, json!({ "messageId": post }))
            .await;
        assert_eq!(reply.status, StatusCode::OK);
    }
    let reply = app
        .action(&alice, "general", "downvoteMessage", json!({ "messageId": post }))
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["upvotes"], 0);
    assert_eq!(reply.body["downvotes"], 1);
    assert_eq!(reply.body["myVote"], -1);

    let listed = app.messages(Some(&alice), "thread=general").await;
    assert_eq!(listed.body[0]["myVote"], -1);
    assert_eq!(listed.body[0]["downvotes"], 1);
}

#[tokio::test]
async fn banned_members_are_locked_out() {
    let app = TestApp::new().await;
    let owner = app.member("owner").await;
    let bob = app.member("bobby").await;
    app.create_thread(&owner, "general").await;
    assert_eq!(
        app.action(&bob, "general", "joinThread", json!({})).await.status,
        StatusCode::OK
    );
    app.send_message(&bob, "general", "first").await;

    let reply = app
        .action(&owner, "general", "banUser", json!({ "username": "bobby" }))
        .await;
    assert_eq!(reply.status, StatusCode::OK);

    let send = app
        .action(&bob, "general", "sendMessage", json!({ "title": "t", "content": "c" }))
        .await;
    assert_eq!(send.status, StatusCode::FORBIDDEN);
    let leave = app.action(&bob, "general", "leaveThread", json!({})).await;
    assert_eq!(leave.status, StatusCode::FORBIDDEN);
    let join = app.action(&bob, "general", "joinThread", json!({})).await;
    assert_eq!(join.status, StatusCode::FORBIDDEN);
    assert_eq!(
        app.messages(Some(&bob), "thread=general").await.status,
        StatusCode::FORBIDDEN
    );

    // The owner still sees the banned user's post.
    let listed = app.messages(Some(&owner), "thread=general").await;
    assert_eq!(listed.body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn owner_cannot_leave_or_be_banned() {
    let app = TestApp::new().await;
    let owner = app.member("owner").await;
    let moderator = app.member("modder").await;
    app.create_thread(&owner, "general").await;
    app.action(&moderator, "general", "joinThread", json!({})).await;
    let promoted = app
        .action(&owner, "general", "promoteUser", json!({ "username": "modder" }))
        .await;
    assert_eq!(promoted.status, StatusCode::OK);

    let leave = app.action(&owner, "general", "leaveThread", json!({})).await;
    assert_eq!(leave.status, StatusCode::BAD_REQUEST);
    let ban = app
        .action(&moderator, "general", "banUser", json!({ "username": "owner" }))
        .await;
    assert_eq!(ban.status, StatusCode::FORBIDDEN);

    let info = app.get("/api/thread/info?thread=general", Some(&owner)).await;
    assert_eq!(info.body["owner"]["username"], "owner");
    assert_eq!(info.body["viewerRank"], 3);
    assert_eq!(info.body["memberCount"], 2);
}

#[tokio::test]
async fn unverified_accounts_cannot_write_until_verified() {
    let app = TestApp::new().await;
    let owner = app.member("owner").await;
    app.create_thread(&owner, "general").await;

    let carol = app.register("carol").await;
    let join = app.action(&carol, "general", "joinThread", json!({})).await;
    assert_eq!(join.status, StatusCode::UNAUTHORIZED);
    let send = app
        .action(&carol, "general", "sendMessage", json!({ "title": "t", "content": "c" }))
        .await;
    assert_eq!(send.status, StatusCode::UNAUTHORIZED);
    let thread = app
        .post("/api/threads", Some(&carol), json!({ "name": "carols" }))
        .await;
    assert_eq!(thread.status, StatusCode::UNAUTHORIZED);

    // Nothing changed.
    let listed = app.messages(None, "thread=general").await;
    assert_eq!(listed.body.as_array().unwrap().len(), 0);
    let missing = app.get("/api/thread/info?thread=carols", None).await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);

    app.verify("carol").await;
    app.action(&carol, "general", "joinThread", json!({})).await;
    let send = app
        .action(&carol, "general", "sendMessage", json!({ "title": "t", "content": "c" }))
        .await;
    assert_eq!(send.status, StatusCode::OK);
}

#[tokio::test]
async fn verification_tokens_work_once() {
    let app = TestApp::new().await;
    app.register("dave1").await;
    let token = app.token_for("dave1@example.org").await;

    let first = app
        .post("/api/auth/verify", None, json!({ "token": token }))
        .await;
    assert_eq!(first.status, StatusCode::OK);
    let second = app
        .post("/api/auth/verify", None, json!({ "token": token }))
        .await;
    assert_eq!(second.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tags_are_unique_per_name_and_deleting_keeps_posts() {
    let app = TestApp::new().await;
    let owner = app.member("owner").await;
    app.create_thread(&owner, "general").await;

    let news = app
        .action(
            &owner,
            "general",
            "createThreadTag",
            json!({ "tagName": "news", "tagColor": "#ff0000" }),
        )
        .await;
    assert_eq!(news.status, StatusCode::OK);
    let news_id = news.body["tag"]["id"].as_i64().unwrap();

    let dup = app
        .action(
            &owner,
            "general",
            "createThreadTag",
            json!({ "tagName": "news", "tagColor": "#00ff00" }),
        )
        .await;
    assert_eq!(dup.status, StatusCode::BAD_REQUEST);
    let upper = app
        .action(
            &owner,
            "general",
            "createThreadTag",
            json!({ "tagName": "NEWS", "tagColor": "#0000ff" }),
        )
        .await;
    assert_eq!(upper.status, StatusCode::OK);

    let post = app
        .action(
            &owner,
            "general",
            "sendMessage",
            json!({ "title": "tagged", "content": "c", "tags": [news_id.to_string()] }),
        )
        .await;
    assert_eq!(post.status, StatusCode::OK);
    let listed = app.messages(Some(&owner), "thread=general").await;
    assert_eq!(listed.body[0]["tags"][0]["name"], "news");

    let deleted = app
        .action(&owner, "general", "deleteThreadTag", json!({ "tagId": news_id.to_string() }))
        .await;
    assert_eq!(deleted.status, StatusCode::OK);

    let listed = app.messages(Some(&owner), "thread=general").await;
    let posts = listed.body.as_array().unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["tags"].as_array().unwrap().len(), 0);

    let tags = app.get("/api/thread/tags?thread=general", None).await;
    assert_eq!(tags.body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn racing_tag_creates_leave_one_winner() {
    let app = TestApp::new().await;
    let owner = app.member("owner").await;
    app.create_thread(&owner, "general").await;

    for round in 0..10 {
        let name = format!("tag{round}");
        let body = json!({ "tagName": name, "tagColor": "#ff0000" });
        let (a, b) = tokio::join!(
            app.action(&owner, "general", "createThreadTag", body.clone()),
            app.action(&owner, "general", "createThreadTag", body.clone()),
        );
        let mut statuses = vec![a.status, b.status];
        statuses.sort();
        assert_eq!(statuses, vec![StatusCode::OK, StatusCode::BAD_REQUEST], "round {round}");
    }

    let tags = app.get("/api/thread/tags?thread=general", None).await;
    assert_eq!(tags.body.as_array().unwrap().len(), 10);

    // Renaming two tags onto the same free name at once.
    let ids: Vec<String> = tags.body.as_array().unwrap()[..2]
        .iter()
        .map(|t| t["id"].to_string())
        .collect();
    let (a, b) = tokio::join!(
        app.action(&owner, "general", "editThreadTag", json!({ "tagId": ids[0], "tagName": "shared" })),
        app.action(&owner, "general", "editThreadTag", json!({ "tagId": ids[1], "tagName": "shared" })),
    );
    let mut statuses = vec![a.status, b.status];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::BAD_REQUEST]);
}

#[tokio::test]
async fn concurrent_upvotes_from_one_viewer_converge() {
    let app = TestApp::new().await;
    let alice = app.member("alice").await;
    app.create_thread(&alice, "general").await;
    let post = app.send_message(&alice, "general", "hello").await;

    for _ in 0..5 {
        let body = json!({ "messageId": post });
        let (a, b) = tokio::join!(
            app.action(&alice, "general", "upvoteMessage", body.clone()),
            app.action(&alice, "general", "upvoteMessage", body.clone()),
        );
        assert_eq!(a.status, StatusCode::OK);
        assert_eq!(b.status, StatusCode::OK);

        // Two toggles cancel out whatever order they ran in.
        let listed = app.messages(Some(&alice), "thread=general").await;
        let row = &listed.body[0];
        assert_eq!(row["upvotes"], 0);
        assert_eq!(row["downvotes"], 0);
        assert_eq!(row["myVote"], 0);
    }

    let once = app
        .action(&alice, "general", "upvoteMessage", json!({ "messageId": post }))
        .await;
    assert_eq!(once.body["upvotes"], 1);
    assert_eq!(once.body["myVote"], 1);
}

#[tokio::test]
async fn newest_posts_come_first_and_tie_break_on_id() {
    let app = TestApp::new().await;
    let owner = app.member("owner").await;
    app.create_thread(&owner, "general").await;
    let first = app.send_message(&owner, "general", "one").await;
    let second = app.send_message(&owner, "general", "two").await;
    let third = app.send_message(&owner, "general", "three").await;
    app.action(&owner, "general", "upvoteMessage", json!({ "messageId": first }))
        .await;

    let ids = |reply: common::Reply| -> Vec<String> {
        reply
            .body
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["id"].to_string())
            .collect()
    };
    let new = ids(app.messages(None, "thread=general&order=new").await);
    assert_eq!(new, vec![third.clone(), second.clone(), first.clone()]);
    let top = ids(app.messages(None, "thread=general&order=top").await);
    assert_eq!(top, vec![first, third, second]);

    let bad = app.messages(None, "thread=general&order=hot").await;
    assert_eq!(bad.status, StatusCode::BAD_REQUEST);
    let offset = app.messages(None, "thread=general&offset=-1").await;
    assert_eq!(offset.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn dispatcher_checks_thread_then_action_then_method() {
    let app = TestApp::new().await;
    let owner = app.member("owner").await;
    app.create_thread(&owner, "general").await;

    let missing = app.get("/api/thread/nowhere/sendMessage", Some(&owner)).await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    let unknown = app.get("/api/thread/general/shout", Some(&owner)).await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);
    let wrong_method = app.get("/api/thread/general/sendMessage", Some(&owner)).await;
    assert_eq!(wrong_method.status, StatusCode::METHOD_NOT_ALLOWED);
    let anonymous = app
        .post("/api/thread/general/sendMessage", None, json!({}))
        .await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn members_only_threads_hide_from_outsiders() {
    let app = TestApp::new().await;
    let owner = app.member("owner").await;
    let eve = app.member("evelyn").await;
    let reply = app
        .post(
            "/api/threads",
            Some(&owner),
            json!({ "name": "private", "openToNonMembers": false, "openToAnonymous": false }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);

    assert_eq!(
        app.messages(None, "thread=private").await.status,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        app.messages(Some(&eve), "thread=private").await.status,
        StatusCode::FORBIDDEN
    );
    app.action(&eve, "private", "joinThread", json!({})).await;
    assert_eq!(
        app.messages(Some(&eve), "thread=private").await.status,
        StatusCode::OK
    );
}

#[tokio::test]
async fn reports_reach_moderators() {
    let app = TestApp::new().await;
    let owner = app.member("owner").await;
    let bob = app.member("bobby").await;
    app.create_thread(&owner, "general").await;
    app.action(&bob, "general", "joinThread", json!({})).await;
    let post = app.send_message(&owner, "general", "hello").await;

    let report = app
        .action(
            &bob,
            "general",
            "reportMessage",
            json!({ "contentToReportID": post, "reportType": "spam", "content": "ads" }),
        )
        .await;
    assert_eq!(report.status, StatusCode::OK);
    let report_id = report.body["reportId"].as_str().unwrap().to_string();

    let denied = app.get("/api/thread/reports?thread=general", Some(&bob)).await;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);

    let resolved = app
        .action(&owner, "general", "setReportToResolved", json!({ "reportId": report_id }))
        .await;
    assert_eq!(resolved.status, StatusCode::OK);
    let listed = app.get("/api/thread/reports?thread=general", Some(&owner)).await;
    assert_eq!(listed.body[0]["resolved"], true);
    assert_eq!(listed.body[0]["reporter"]["username"], "bobby");
}

#[tokio::test]
async fn comments_follow_their_post() {
    let app = TestApp::new().await;
    let owner = app.member("owner").await;
    app.create_thread(&owner, "general").await;
    let post = app.send_message(&owner, "general", "hello").await;

    let comment = app
        .action(
            &owner,
            "general",
            "sendComment",
            json!({ "messageId": post, "content": "first!" }),
        )
        .await;
    assert_eq!(comment.status, StatusCode::OK);

    let listed = app
        .get(&format!("/api/thread/comments?thread=general&message={post}"), None)
        .await;
    assert_eq!(listed.body[0]["content"], "first!");

    app.action(&owner, "general", "deleteMessage", json!({ "messageId": post }))
        .await;
    let gone = app
        .get(&format!("/api/thread/comments?thread=general&message={post}"), None)
        .await;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn directory_profiles_and_single_messages() {
    let app = TestApp::new().await;
    let owner = app.member("owner").await;
    let bob = app.member("bobby").await;
    app.create_thread(&owner, "general").await;
    app.create_thread(&owner, "offtopic").await;
    app.action(&bob, "offtopic", "joinThread", json!({})).await;

    let directory = app.get("/api/threads", Some(&bob)).await;
    assert_eq!(directory.status, StatusCode::OK);
    let rows = directory.body.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["name"], "offtopic");
    assert_eq!(rows[0]["rank"], 1);
    assert_eq!(rows[0]["memberCount"], 2);
    assert_eq!(rows[1]["rank"], 0);
    let second_page = app.get("/api/threads?offset=1", None).await;
    assert_eq!(second_page.body.as_array().unwrap().len(), 1);
    assert_eq!(app.get("/api/threads?offset=-1", None).await.status, StatusCode::BAD_REQUEST);

    let profile = app.get("/api/user/bobby", None).await;
    assert_eq!(profile.status, StatusCode::OK);
    assert_eq!(profile.body["username"], "bobby");
    assert!(profile.body.get("email").is_none());
    let threads = profile.body["threads"].as_array().unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0]["name"], "offtopic");
    assert_eq!(app.get("/api/user/nobody", None).await.status, StatusCode::NOT_FOUND);

    let post = app.send_message(&bob, "offtopic", "hello").await;
    app.action(&bob, "offtopic", "upvoteMessage", json!({ "messageId": post }))
        .await;
    let uri = format!("/api/thread/message?thread=offtopic&message={post}");
    let mine = app.get(&uri, Some(&bob)).await;
    assert_eq!(mine.status, StatusCode::OK);
    assert_eq!(mine.body["title"], "hello");
    assert_eq!(mine.body["upvotes"], 1);
    assert_eq!(mine.body["myVote"], 1);
    assert_eq!(app.get(&uri, None).await.body["myVote"], 0);

    let elsewhere = app
        .get(&format!("/api/thread/message?thread=general&message={post}"), None)
        .await;
    assert_eq!(elsewhere.status, StatusCode::NOT_FOUND);
    let missing = app.get("/api/thread/message?thread=offtopic", None).await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);
}
