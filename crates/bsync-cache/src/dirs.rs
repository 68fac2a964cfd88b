//! Cache directory tree management.

use crate::handler::HandlerConfig;
use crate::paths::QUARANTINE;
use std::io;
use std::path::{Path, PathBuf};

/// Creates, verifies, and tears down the cache directory skeleton.
#[derive(Debug, Clone)]
pub struct DirectoryManager {
    root: PathBuf,
}

impl DirectoryManager {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the base directory of every configured subtree plus the
    /// quarantine area. Idempotent.
    pub fn create_skeleton(&self, configs: &[HandlerConfig]) -> io::Result<()> {
        for cfg in configs {
            std::fs::create_dir_all(self.root.join(cfg.subtree_rel()))?;
        }
        std::fs::create_dir_all(self.root.join(QUARANTINE))
    }

    pub fn subtree_exists(&self, config: &HandlerConfig) -> bool {
        self.root.join(config.subtree_rel()).is_dir()
    }

    /// Removes a subtree and recreates its empty base directory.
    pub fn rebuild_subtree(&self, config: &HandlerConfig) -> io::Result<()> {
        let subtree = self.root.join(config.subtree_rel());
        match std::fs::remove_dir_all(&subtree) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        std::fs::create_dir_all(&subtree)
    }

    /// Removes directories left empty after their record files were deleted,
    /// walking bottom-up. The subtree base itself is kept.
    pub fn prune_empty_dirs(&self, config: &HandlerConfig) -> io::Result<()> {
        let base = self.root.join(config.subtree_rel());
        prune_below(&base)?;
        Ok(())
    }
}

fn prune_below(dir: &Path) -> io::Result<bool> {
    let mut empty = true;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            let child = entry.path();
            if prune_below(&child)? {
                std::fs::remove_dir(&child)?;
            } else {
                empty = false;
            }
        } else {
            empty = false;
        }
    }
    Ok(empty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::default_handler_configs;

    #[test]
    fn skeleton_creates_every_subtree() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = DirectoryManager::new(dir.path());
        let configs = default_handler_configs();
        mgr.create_skeleton(&configs).unwrap();
        for cfg in &configs {
            assert!(mgr.subtree_exists(cfg), "missing {:?}", cfg.subtree_rel());
        }
        assert!(dir.path().join(QUARANTINE).is_dir());
        // Idempotent.
        mgr.create_skeleton(&configs).unwrap();
    }

    #[test]
    fn rebuild_clears_contents() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = DirectoryManager::new(dir.path());
        let configs = default_handler_configs();
        mgr.create_skeleton(&configs).unwrap();
        let post = &configs[0];
        let f = dir.path().join(post.subtree_rel()).join("x.json");
        std::fs::write(&f, b"{}").unwrap();
        mgr.rebuild_subtree(post).unwrap();
        assert!(!f.exists());
        assert!(mgr.subtree_exists(post));
    }

    #[test]
    fn prune_removes_only_empty_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = DirectoryManager::new(dir.path());
        let configs = default_handler_configs();
        mgr.create_skeleton(&configs).unwrap();
        let like = configs.iter().find(|c| c.key.as_str() == "like").unwrap();
        let base = dir.path().join(like.subtree_rel());
        std::fs::create_dir_all(base.join("empty_suffix")).unwrap();
        std::fs::create_dir_all(base.join("full_suffix")).unwrap();
        std::fs::write(base.join("full_suffix/x.json"), b"{}").unwrap();
        mgr.prune_empty_dirs(like).unwrap();
        assert!(!base.join("empty_suffix").exists());
        assert!(base.join("full_suffix/x.json").exists());
    }
}
