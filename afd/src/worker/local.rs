//! Local-copy transport: "remote" is a directory on this machine.
//!
//! Used for loc:// destinations and heavily in tests, where it stands
//! in for the network transports behind the same session trait.

use std::path::{Path, PathBuf};

use super::session::{ProtocolSession, RemoteEntry, SessionError};

pub struct LocalSession {
    root: PathBuf,
    alive: bool,
}

impl LocalSession {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            alive: true,
        }
    }

    fn target(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl ProtocolSession for LocalSession {
    fn scheme(&self) -> &'static str {
        "loc"
    }

    fn is_alive(&self) -> bool {
        self.alive
    }

    fn list(&mut self, remote_dir: &str) -> Result<Vec<RemoteEntry>, SessionError> {
        let dir = if remote_dir.is_empty() {
            self.root.clone()
        } else {
            self.root.join(remote_dir)
        };
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64);
            entries.push(RemoteEntry {
                name,
                size: meta.len(),
                mtime,
            });
        }
        Ok(entries)
    }

    fn store(&mut self, local: &Path, remote_name: &str) -> Result<u64, SessionError> {
        let target = self.target(remote_name);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(std::fs::copy(local, &target)?)
    }

    fn retrieve(&mut self, remote_name: &str, local: &Path) -> Result<u64, SessionError> {
        Ok(std::fs::copy(self.target(remote_name), local)?)
    }

    fn remove_remote(&mut self, remote_name: &str) -> Result<(), SessionError> {
        Ok(std::fs::remove_file(self.target(remote_name))?)
    }

    fn rename_remote(&mut self, from: &str, to: &str) -> Result<(), SessionError> {
        Ok(std::fs::rename(self.target(from), self.target(to))?)
    }

    fn quit(&mut self) -> Result<(), SessionError> {
        self.alive = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_list_retrieve_remove() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("a.txt");
        std::fs::write(&src, b"payload").unwrap();

        let mut s = LocalSession::new(dst_dir.path());
        assert_eq!(s.store(&src, "a.txt").unwrap(), 7);
        let listed = s.list("").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "a.txt");
        assert_eq!(listed[0].size, 7);

        let back = src_dir.path().join("back.txt");
        assert_eq!(s.retrieve("a.txt", &back).unwrap(), 7);
        s.rename_remote("a.txt", "b.txt").unwrap();
        s.remove_remote("b.txt").unwrap();
        assert!(s.list("").unwrap().is_empty());
        s.quit().unwrap();
        assert!(!s.is_alive());
    }
}
