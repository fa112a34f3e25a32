use image::ImageFormat;
use rusqlite::{params, Connection, OptionalExtension};

use crate::authz::MediaKind;
use crate::error::{ApiError, ApiResult};

/// Bytes inspected to detect the file type.
pub const SNIFF_LEN: usize = 512;

/// Public URL of an uploaded file.
pub fn url_for(filename: &str) -> String {
    format!("/upload/{filename}")
}

/// Maps the leading bytes of an upload to the extension it is stored with.
/// Only PNG, JPEG and GIF are accepted.
pub fn sniff_extension(bytes: &[u8]) -> Option<&'static str> {
    let head = &bytes[..bytes.len().min(SNIFF_LEN)];
    match image::guess_format(head).ok()? {
        ImageFormat::Png => Some(".png"),
        ImageFormat::Jpeg => Some(".jpg"),
        ImageFormat::Gif => Some(".gif"),
        _ => None,
    }
}

pub fn insert(conn: &Connection, kind: MediaKind, filename: &str) -> ApiResult<i64> {
    conn.execute(
        "INSERT INTO media_links (kind, filename) VALUES (?1, ?2)",
        params![kind.as_str(), filename],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn filename(conn: &Connection, media_id: i64) -> ApiResult<Option<String>> {
    let name = conn
        .query_row(
            "SELECT filename FROM media_links WHERE id = ?1",
            [media_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(name)
}

/// Claims unassigned post media for `post_id`, in order. Fails on the first id
/// that is unknown, of another kind, or already on a post; the caller's
/// transaction is then expected to roll back.
pub fn attach_to_post(conn: &Connection, post_id: i64, media_ids: &[i64]) -> ApiResult<()> {
    let mut stmt = conn.prepare(
        "UPDATE media_links SET post_id = ?1, ordinal = ?2
         WHERE id = ?3 AND kind = 'post-media' AND post_id IS NULL",
    )?;
    for (ordinal, &media_id) in media_ids.iter().enumerate() {
        let claimed = stmt.execute(params![post_id, ordinal as i64, media_id])?;
        if claimed == 0 {
            return Err(ApiError::validation(format!(
                "media {media_id} cannot be attached"
            )));
        }
    }
    Ok(())
}

/// Drops a media link from a post. The file itself stays on disk.
pub fn remove_from_post(conn: &Connection, post_id: i64, media_id: i64) -> ApiResult<()> {
    let removed = conn.execute(
        "DELETE FROM media_links WHERE id = ?1 AND post_id = ?2",
        params![media_id, post_id],
    )?;
    if removed == 0 {
        return Err(ApiError::not_found("media not found on this message"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_connection;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    const JPEG: &[u8] = b"\xFF\xD8\xFF\xE0\0\x10JFIF\0";
    const GIF: &[u8] = b"GIF89a\x01\0\x01\0";

    #[test]
    fn sniffs_allowed_formats() {
        assert_eq!(sniff_extension(PNG), Some(".png"));
        assert_eq!(sniff_extension(JPEG), Some(".jpg"));
        assert_eq!(sniff_extension(GIF), Some(".gif"));
    }

    #[test]
    fn rejects_everything_else() {
        assert_eq!(sniff_extension(b"%PDF-1.7"), None);
        assert_eq!(sniff_extension(b"BM\0\0\0\0"), None);
        assert_eq!(sniff_extension(b""), None);
    }

    #[test]
    fn media_is_claimed_once() {
        let conn = test_connection();
        conn.execute_batch(
            "INSERT INTO users (email, username, first_name, last_name) VALUES ('a@b.co', 'ann', 'A', 'B');
             INSERT INTO threads (name, owner_id) VALUES ('general', 1);
             INSERT INTO posts (thread_id, user_id, title, content) VALUES (1, 1, 'one', 'x');
             INSERT INTO posts (thread_id, user_id, title, content) VALUES (1, 1, 'two', 'y');",
        )
        .unwrap();
        let media = insert(&conn, MediaKind::PostMedia, "a.png").unwrap();
        let avatar = insert(&conn, MediaKind::Avatar, "b.png").unwrap();

        attach_to_post(&conn, 1, &[media]).unwrap();
        assert!(attach_to_post(&conn, 2, &[media]).is_err());
        assert!(attach_to_post(&conn, 2, &[avatar]).is_err());
        assert!(attach_to_post(&conn, 2, &[999]).is_err());

        let owner: i64 = conn
            .query_row("SELECT post_id FROM media_links WHERE id = ?1", [media], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(owner, 1);
    }

    #[test]
    fn removing_unknown_media_is_not_found() {
        let conn = test_connection();
        assert!(matches!(
            remove_from_post(&conn, 1, 1),
            Err(ApiError::NotFound(_))
        ));
    }
}
