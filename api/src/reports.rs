use std::str::FromStr;

use rusqlite::{params, Connection};

use agora_shared::{ReportDto, UserSummary};

use crate::error::{ApiError, ApiResult};
use crate::{media, validate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Spam,
    Harassment,
    Illegal,
    Other,
}

impl ReportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spam => "spam",
            Self::Harassment => "harassment",
            Self::Illegal => "illegal",
            Self::Other => "other",
        }
    }
}

impl FromStr for ReportKind {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spam" => Ok(Self::Spam),
            "harassment" => Ok(Self::Harassment),
            "illegal" => Ok(Self::Illegal),
            "other" => Ok(Self::Other),
            other => Err(ApiError::validation(format!("unknown report type {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectKind {
    Post,
    Comment,
}

impl SubjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Comment => "comment",
        }
    }
}

/// Files a report. The subject must already be known to sit in `thread_id`.
/// Repeated reports by the same user are accepted.
pub fn create(
    conn: &Connection,
    thread_id: i64,
    subject: SubjectKind,
    subject_id: i64,
    reporter_id: i64,
    kind: ReportKind,
    reason: &str,
) -> ApiResult<i64> {
    let reason = validate::content(reason)?;
    conn.execute(
        "INSERT INTO reports (thread_id, subject_kind, subject_id, reporter_id, kind, reason)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            thread_id,
            subject.as_str(),
            subject_id,
            reporter_id,
            kind.as_str(),
            reason
        ],
    )?;
    let id = conn.last_insert_rowid();
    tracing::info!(
        thread_id,
        report_id = id,
        subject = subject.as_str(),
        subject_id,
        kind = kind.as_str(),
        "content reported"
    );
    Ok(id)
}

/// Marks a report of this thread resolved; resolving twice is fine.
pub fn resolve(conn: &Connection, thread_id: i64, report_id: i64) -> ApiResult<()> {
    let found = conn.execute(
        "UPDATE reports SET resolved = 1 WHERE id = ?1 AND thread_id = ?2",
        params![report_id, thread_id],
    )?;
    if found == 0 {
        return Err(ApiError::not_found("report not found"));
    }
    Ok(())
}

/// Open reports first, each group newest first.
pub fn list(conn: &Connection, thread_id: i64) -> ApiResult<Vec<ReportDto>> {
    let mut stmt = conn.prepare(
        "SELECT r.id, r.subject_kind, r.subject_id, u.id, u.username, am.filename,
                r.kind, r.reason, r.resolved, r.created_at
         FROM reports r
         JOIN users u ON u.id = r.reporter_id
         LEFT JOIN user_configs uc ON uc.user_id = u.id
         LEFT JOIN media_links am ON am.id = uc.avatar_media_id
         WHERE r.thread_id = ?1
         ORDER BY r.resolved ASC, r.created_at DESC, r.id DESC",
    )?;
    let reports = stmt
        .query_map([thread_id], |row| {
            Ok(ReportDto {
                id: row.get(0)?,
                subject_kind: row.get(1)?,
                subject_id: row.get(2)?,
                reporter: UserSummary {
                    id: row.get(3)?,
                    username: row.get(4)?,
                    avatar_url: row.get::<_, Option<String>>(5)?.map(|f| media::url_for(&f)),
                },
                kind: row.get(6)?,
                reason: row.get(7)?,
                resolved: row.get(8)?,
                created_at: row.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(reports)
}
