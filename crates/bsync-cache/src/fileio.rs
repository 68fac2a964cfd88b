//! JSON file primitives with atomic-rename semantics.
//!
//! Writes go to a uuid-suffixed temp sibling, are fsynced, renamed into
//! place, and the containing directory is fsynced so a crash can never leave
//! a half-written record where the exporter would read it.

use crate::paths::{QUARANTINE, TMP_SUFFIX};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Read-side failures; parse errors are quarantined during export while I/O
/// errors abort the subtree.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Serializes `value` and writes it durably to `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let bytes = serde_json::to_vec(value).map_err(io::Error::other)?;
    write_bytes_atomic(path, &bytes)
}

/// Durable byte write: temp sibling + fsync + rename + directory fsync.
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::other(format!("no parent directory: {}", path.display())))?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::other(format!("invalid file name: {}", path.display())))?;
    let tmp = parent.join(format!(
        ".{file_name}.{}{TMP_SUFFIX}",
        Uuid::new_v4().simple()
    ));

    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    match fs::rename(&tmp, path) {
        Ok(()) => {}
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
    }
    fsync_dir(parent)
}

fn fsync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ReadError> {
    let bytes = fs::read(path).map_err(|source| ReadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| ReadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Recursively lists `.json` record files under `dir`, in sorted order.
///
/// Skips the quarantine subtree, dotfiles, and in-flight temp files. A
/// missing directory is an empty listing, not an error.
pub fn list_json_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    collect_json_files(dir, &mut out)?;
    out.sort();
    Ok(out)
}

fn collect_json_files(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || name == QUARANTINE {
            continue;
        }
        if entry.file_type()?.is_dir() {
            collect_json_files(&path, out)?;
        } else if name.ends_with(".json") && !name.ends_with(TMP_SUFFIX) {
            out.push(path);
        }
    }
    Ok(())
}

/// Moves a file into `{cache_root}/__quarantine__/`, preserving its
/// cache-relative path so the original location stays reconstructable.
pub fn move_to_quarantine(cache_root: &Path, file: &Path) -> io::Result<PathBuf> {
    let rel = file.strip_prefix(cache_root).map_err(io::Error::other)?;
    let target = cache_root.join(QUARANTINE).join(rel);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(file, &target)?;
    Ok(target)
}

/// Best-effort deletion of a set of source files; returns the first error
/// after attempting every path.
pub fn remove_files(paths: &[PathBuf]) -> io::Result<()> {
    let mut first_err = None;
    for path in paths {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != io::ErrorKind::NotFound && first_err.is_none() {
                first_err = Some(e);
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn atomic_write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/record.json");
        write_json_atomic(&path, &json!({"k": "v"})).unwrap();
        let back: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(back, json!({"k": "v"}));
    }

    #[test]
    fn rewrite_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");
        write_json_atomic(&path, &json!({"v": 1})).unwrap();
        write_json_atomic(&path, &json!({"v": 2})).unwrap();
        let back: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(back, json!({"v": 2}));
        // No temp leftovers.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn listing_skips_quarantine_and_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        write_json_atomic(&dir.path().join("keep.json"), &json!(1)).unwrap();
        write_json_atomic(&dir.path().join("nested/keep2.json"), &json!(2)).unwrap();
        fs::create_dir_all(dir.path().join(QUARANTINE)).unwrap();
        fs::write(dir.path().join(QUARANTINE).join("bad.json"), b"{").unwrap();
        fs::write(dir.path().join(format!(".x.abc{TMP_SUFFIX}")), b"{").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let files = list_json_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|p| !p.to_string_lossy().contains(QUARANTINE)));
    }

    #[test]
    fn missing_dir_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_json_files(&dir.path().join("absent")).unwrap().is_empty());
    }

    #[test]
    fn quarantine_preserves_relative_path() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("study_user_activity/create/post/x.json");
        write_json_atomic(&file, &json!(1)).unwrap();
        let moved = move_to_quarantine(root.path(), &file).unwrap();
        assert!(!file.exists());
        assert_eq!(
            moved,
            root.path()
                .join(QUARANTINE)
                .join("study_user_activity/create/post/x.json")
        );
    }

    #[test]
    fn parse_failure_is_distinguished_from_io() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, b"{ not json").unwrap();
        match read_json::<serde_json::Value>(&path) {
            Err(ReadError::Parse { .. }) => {}
            other => panic!("expected parse error, got {other:?}"),
        }
        match read_json::<serde_json::Value>(&dir.path().join("absent.json")) {
            Err(ReadError::Io { .. }) => {}
            other => panic!("expected io error, got {other:?}"),
        }
    }
}
