use std::path::Path;

use chrono::{DateTime, Utc};
use color_eyre::eyre::{eyre, WrapErr};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::errors::{ErrorKind, FlowResult, FormatProblem, WithKind};

/// Marker that identifies a feed post in an `at://` URI
pub const FEED_POST_MARKER: &str = "/app.bsky.feed.post/";

/// A bookmark taken from a backup file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookmarkRecord {
    pub cid: String,
    pub uri: String,
    /// Only used for ordering; `None` when missing or unparsable
    pub indexed_at: Option<DateTime<Utc>>,
}

impl BookmarkRecord {
    pub fn is_feed_post(&self) -> bool {
        self.uri.contains(FEED_POST_MARKER)
    }

    /// The exact body sent to `createBookmark`
    pub fn subject(&self) -> BookmarkSubject<'_> {
        BookmarkSubject {
            cid: &self.cid,
            uri: &self.uri,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BookmarkSubject<'a> {
    pub cid: &'a str,
    pub uri: &'a str,
}

/// Records in replay order, oldest first. Read-only once built.
#[derive(Debug, Clone)]
pub struct ImportBatch {
    records: Vec<BookmarkRecord>,
}

impl ImportBatch {
    pub fn records(&self) -> &[BookmarkRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BookmarkRecord> {
        self.records.iter()
    }
}

impl<'a> IntoIterator for &'a ImportBatch {
    type Item = &'a BookmarkRecord;
    type IntoIter = std::slice::Iter<'a, BookmarkRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

fn format_error<T>(problem: FormatProblem, report: color_eyre::Report) -> FlowResult<T> {
    Err(report).with_kind(ErrorKind::Format(problem))
}

/// Read a backup from disk and build the batch
///
/// The file has to look like JSON by its extension before it is even read.
#[tracing::instrument]
pub fn load_backup(path: &Path) -> FlowResult<ImportBatch> {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if mime != mime_guess::mime::APPLICATION_JSON {
        return format_error(
            FormatProblem::FileType,
            eyre!("{} is {}, expected application/json", path.display(), mime),
        );
    }

    let bytes = match std::fs::read(path).wrap_err_with(|| format!("Failed to read {}", path.display())) {
        Ok(bytes) => bytes,
        Err(e) => return format_error(FormatProblem::FileType, e),
    };

    parse_backup(&bytes)
}

/// Parse backup content into an ordered batch
pub fn parse_backup(bytes: &[u8]) -> FlowResult<ImportBatch> {
    let content: Value = match serde_json::from_slice(bytes) {
        Ok(content) => content,
        Err(e) => {
            return format_error(
                FormatProblem::Json,
                color_eyre::Report::new(e).wrap_err("Backup file is not valid JSON"),
            )
        }
    };

    build_batch(&content)
}

/// Filter and order the `posts` array of an already-parsed backup
pub fn build_batch(content: &Value) -> FlowResult<ImportBatch> {
    let Some(posts) = content.get("posts").and_then(Value::as_array) else {
        return format_error(FormatProblem::Schema, eyre!("No posts array found"));
    };

    let mut records: Vec<BookmarkRecord> = posts.iter().filter_map(to_record).collect();

    let dropped = posts.len() - records.len();
    if dropped > 0 {
        debug!("Dropped {} of {} posts without a cid and uri", dropped, posts.len());
    }

    // Stable, so ties keep their file order. Undated records sort first.
    records.sort_by_key(|record| record.indexed_at);

    if records.is_empty() {
        return format_error(FormatProblem::Empty, eyre!("No valid posts found"));
    }

    info!("Loaded {} bookmarks from backup", records.len());
    Ok(ImportBatch { records })
}

fn to_record(post: &Value) -> Option<BookmarkRecord> {
    let cid = post.get("cid")?.as_str()?;
    let uri = post.get("uri")?.as_str()?;

    let indexed_at = ["indexed_at", "indexedAt"]
        .iter()
        .find_map(|key| post.get(*key).and_then(Value::as_str))
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Some(BookmarkRecord {
        cid: cid.to_string(),
        uri: uri.to_string(),
        indexed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cids(batch: &ImportBatch) -> Vec<&str> {
        batch.iter().map(|r| r.cid.as_str()).collect()
    }

    fn post(cid: &str, at: &str) -> Value {
        json!({ "cid": cid, "uri": format!("at://did:plc:x/app.bsky.feed.post/{cid}"), "indexed_at": at })
    }

    #[test]
    fn test_missing_or_non_array_posts_is_a_schema_error() {
        for content in [
            json!({}),
            json!({ "posts": null }),
            json!({ "posts": "nope" }),
            json!({ "posts": { "0": {} } }),
            json!([]),
            json!("posts"),
        ] {
            let err = build_batch(&content).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Format(FormatProblem::Schema));
        }
    }

    #[test]
    fn test_invalid_json_is_a_json_error() {
        let err = parse_backup(b"{\"posts\": [").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format(FormatProblem::Json));
    }

    #[test]
    fn test_empty_posts_is_an_empty_error() {
        let err = parse_backup(br#"{"posts":[]}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format(FormatProblem::Empty));
    }

    #[test]
    fn test_only_string_cid_and_uri_survive() -> color_eyre::Result<()> {
        let content = json!({
            "posts": [
                { "cid": "keep", "uri": "at://x/app.bsky.feed.post/1", "indexed_at": "2024-01-01T00:00:00Z" },
                { "cid": 5, "uri": "at://x/app.bsky.feed.post/2" },
                { "uri": "at://x/app.bsky.feed.post/3" },
                { "cid": "no-uri" },
                { "cid": "null-uri", "uri": null },
                "just a string",
                null
            ]
        });

        let batch = build_batch(&content)?;
        assert_eq!(cids(&batch), vec!["keep"]);

        Ok(())
    }

    #[test]
    fn test_nothing_valid_is_an_empty_error() {
        let content = json!({ "posts": [{ "cid": 1, "uri": 2 }, {}] });
        let err = build_batch(&content).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format(FormatProblem::Empty));
    }

    #[test]
    fn test_sorts_oldest_first() -> color_eyre::Result<()> {
        let sorted = json!({ "posts": [
            post("a", "2024-01-01T00:00:00Z"),
            post("b", "2024-01-02T00:00:00Z"),
            post("c", "2024-01-03T00:00:00Z"),
        ]});
        assert_eq!(cids(&build_batch(&sorted)?), vec!["a", "b", "c"]);

        let reversed = json!({ "posts": [
            post("c", "2024-01-03T00:00:00Z"),
            post("b", "2024-01-02T00:00:00Z"),
            post("a", "2024-01-01T00:00:00Z"),
        ]});
        assert_eq!(cids(&build_batch(&reversed)?), vec!["a", "b", "c"]);

        Ok(())
    }

    #[test]
    fn test_compares_instants_not_strings() -> color_eyre::Result<()> {
        // 01:00+02:00 is 23:00 the day before in UTC
        let content = json!({ "posts": [
            post("utc", "2024-01-01T00:00:00Z"),
            post("offset", "2024-01-01T01:00:00+02:00"),
        ]});
        assert_eq!(cids(&build_batch(&content)?), vec!["offset", "utc"]);

        Ok(())
    }

    #[test]
    fn test_duplicate_timestamps_are_non_decreasing() -> color_eyre::Result<()> {
        let content = json!({ "posts": [
            post("late", "2024-03-01T00:00:00Z"),
            post("tie1", "2024-02-01T00:00:00Z"),
            post("early", "2024-01-01T00:00:00Z"),
            post("tie2", "2024-02-01T00:00:00Z"),
        ]});

        let batch = build_batch(&content)?;
        let times: Vec<_> = batch.iter().map(|r| r.indexed_at).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(cids(&batch), vec!["early", "tie1", "tie2", "late"]);

        Ok(())
    }

    #[test]
    fn test_undated_records_are_kept_and_go_first() -> color_eyre::Result<()> {
        let content = json!({ "posts": [
            post("dated", "2024-01-01T00:00:00Z"),
            { "cid": "undated", "uri": "at://x/app.bsky.feed.post/u" },
            post("garbage-date", "yesterday"),
        ]});

        assert_eq!(
            cids(&build_batch(&content)?),
            vec!["undated", "garbage-date", "dated"]
        );

        Ok(())
    }

    #[test]
    fn test_camel_case_timestamp_is_accepted() -> color_eyre::Result<()> {
        let content = json!({ "posts": [
            { "cid": "b", "uri": "at://x/app.bsky.feed.post/b", "indexedAt": "2024-01-02T00:00:00Z" },
            { "cid": "a", "uri": "at://x/app.bsky.feed.post/a", "indexedAt": "2024-01-01T00:00:00Z" },
        ]});
        assert_eq!(cids(&build_batch(&content)?), vec!["a", "b"]);

        Ok(())
    }

    #[test]
    fn test_non_string_snake_case_timestamp_falls_back_to_camel_case() -> color_eyre::Result<()> {
        let content = json!({ "posts": [
            { "cid": "b", "uri": "at://x/app.bsky.feed.post/b", "indexed_at": "2024-01-02T00:00:00Z" },
            { "cid": "a", "uri": "at://x/app.bsky.feed.post/a", "indexed_at": 1704067200, "indexedAt": "2024-01-03T00:00:00Z" },
        ]});

        let batch = build_batch(&content)?;
        assert_eq!(cids(&batch), vec!["b", "a"]);
        assert!(batch.iter().all(|r| r.indexed_at.is_some()));

        Ok(())
    }

    #[test]
    fn test_feed_post_marker() {
        let post = BookmarkRecord {
            cid: "c".to_string(),
            uri: "at://did:plc:x/app.bsky.feed.post/3k".to_string(),
            indexed_at: None,
        };
        assert!(post.is_feed_post());

        let like = BookmarkRecord {
            uri: "at://did:plc:x/app.bsky.feed.like/3k".to_string(),
            ..post
        };
        assert!(!like.is_feed_post());
    }

    #[test]
    fn test_load_backup_checks_file_type() -> color_eyre::Result<()> {
        let dir = tempfile::tempdir()?;

        let txt = dir.path().join("backup.txt");
        std::fs::write(&txt, br#"{"posts":[]}"#)?;
        let err = load_backup(&txt).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format(FormatProblem::FileType));

        let missing = dir.path().join("missing.json");
        let err = load_backup(&missing).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format(FormatProblem::FileType));

        let json = dir.path().join("backup.json");
        std::fs::write(
            &json,
            br#"{"posts":[{"cid":"a","uri":"at://x/app.bsky.feed.post/1","indexed_at":"2024-01-02T00:00:00Z"}]}"#,
        )?;
        assert_eq!(load_backup(&json)?.len(), 1);

        Ok(())
    }
}
