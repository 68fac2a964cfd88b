//! Pure path derivation for the cache tree.
//!
//! Everything here is a function of record contents only; two records with
//! identical content always map to the same path.

use bsync_core::{NormalizedRecord, Operation};

pub const STUDY_USER_ACTIVITY: &str = "study_user_activity";
pub const IN_NETWORK_USER_ACTIVITY: &str = "in_network_user_activity";
pub const QUARANTINE: &str = "__quarantine__";

/// Suffix appended to in-flight temp files so enumeration can skip them.
pub const TMP_SUFFIX: &str = ".tmp";

/// Maps an arbitrary identifier onto a single safe path segment.
///
/// Path separators and parent references are folded into `_`; the result is
/// deterministic and can never navigate out of its directory.
pub fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Rejects nested segments that would escape their subtree even before
/// sanitizing. Used by handlers to distinguish a path violation (fatal,
/// discarded) from an identifier that merely needs cleaning.
pub fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains('/')
        && !segment.contains('\\')
        && !segment.contains('\0')
}

/// Collapses an `at://` uri into a flat directory segment:
/// `at://did:ex:A/app.bsky.feed.post/r1` becomes
/// `did:ex:A_app.bsky.feed.post_r1`.
pub fn uri_suffix(uri: &str) -> String {
    let trimmed = uri.strip_prefix("at://").unwrap_or(uri);
    sanitize_segment(&trimmed.replace('/', "_"))
}

/// Filename for a record, a pure function of its identity so replays
/// overwrite in place. Tombstones share one flat subtree across record
/// types, so their filename carries the type tag as well.
pub fn filename(record: &NormalizedRecord) -> String {
    let author = sanitize_segment(&record.author_id);
    let rkey = sanitize_segment(&record.record_key);
    match record.op {
        Operation::Create => format!("author_id={author}_record_key={rkey}.json"),
        Operation::Delete => format!(
            "author_id={author}_record_type={}_record_key={rkey}.json",
            record.record_type.as_str()
        ),
    }
}
