//! Polling watcher for mock definition files.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

use crate::error::PbmockError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Added(PathBuf),
    Changed(PathBuf),
    Removed(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Added(p) | WatchEvent::Changed(p) | WatchEvent::Removed(p) => p,
        }
    }
}

type Snapshot = BTreeMap<PathBuf, Option<SystemTime>>;

/// Tracks `*.<suffix>.json` / `*.<suffix>.jsonc` files under a directory and
/// reports what changed between polls.
#[derive(Debug)]
pub struct MockWatcher {
    dir: PathBuf,
    patterns: [String; 2],
    known: Snapshot,
}

impl MockWatcher {
    pub fn new(dir: impl Into<PathBuf>, file_suffix: &str) -> Self {
        Self {
            dir: dir.into(),
            patterns: [format!(".{file_suffix}.json"), format!(".{file_suffix}.jsonc")],
            known: Snapshot::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| self.patterns.iter().any(|p| name.ends_with(p.as_str())))
    }

    fn scan(&self) -> Snapshot {
        // a vanished root or unreadable entry just drops out of the snapshot
        WalkDir::new(&self.dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| {
                let entry = e.ok()?;
                if !entry.file_type().is_file() || !self.matches(entry.path()) {
                    return None;
                }
                let modified = entry.metadata().ok().and_then(|m| m.modified().ok());
                Some((entry.into_path(), modified))
            })
            .collect()
    }

    /// Rescan and return the events since the previous poll. The first poll
    /// reports every matching file as added.
    pub async fn poll(&mut self) -> Result<Vec<WatchEvent>, PbmockError> {
        let scanner = MockWatcher {
            dir: self.dir.clone(),
            patterns: self.patterns.clone(),
            known: Snapshot::new(),
        };
        let current = tokio::task::spawn_blocking(move || scanner.scan())
            .await
            .map_err(|e| PbmockError::IoError(std::io::Error::other(e)))?;
        let events = diff(&self.known, &current);
        self.known = current;
        Ok(events)
    }
}

/// Removals first, then additions and changes, each in path order.
fn diff(known: &Snapshot, current: &Snapshot) -> Vec<WatchEvent> {
    let removed: BTreeSet<&PathBuf> = known.keys().filter(|p| !current.contains_key(*p)).collect();

    let mut events: Vec<WatchEvent> = removed
        .into_iter()
        .map(|p| WatchEvent::Removed(p.clone()))
        .collect();
    for (path, modified) in current {
        match known.get(path) {
            None => events.push(WatchEvent::Added(path.clone())),
            Some(prev) if prev != modified => events.push(WatchEvent::Changed(path.clone())),
            Some(_) => {}
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn snapshot(entries: &[(&str, u64)]) -> Snapshot {
        entries
            .iter()
            .map(|(p, secs)| {
                (
                    PathBuf::from(p),
                    Some(SystemTime::UNIX_EPOCH + Duration::from_secs(*secs)),
                )
            })
            .collect()
    }

    #[test]
    fn matches_suffix_patterns() {
        let watcher = MockWatcher::new("/m", "mock");
        assert!(watcher.matches(Path::new("/m/a.mock.json")));
        assert!(watcher.matches(Path::new("/m/sub/a.mock.jsonc")));
        assert!(!watcher.matches(Path::new("/m/a.json")));
        assert!(!watcher.matches(Path::new("/m/a.mock.ts")));
        assert!(!watcher.matches(Path::new("/m/a.fake.json")));

        let custom = MockWatcher::new("/m", "fake");
        assert!(custom.matches(Path::new("/m/a.fake.json")));
    }

    #[test]
    fn diff_reports_added_changed_removed() {
        let before = snapshot(&[
            ("/m/a.mock.json", 1),
            ("/m/b.mock.json", 1),
            ("/m/c.mock.json", 1),
        ]);
        let after = snapshot(&[
            ("/m/a.mock.json", 1),
            ("/m/b.mock.json", 2),
            ("/m/d.mock.json", 1),
        ]);
        assert_eq!(
            diff(&before, &after),
            vec![
                WatchEvent::Removed("/m/c.mock.json".into()),
                WatchEvent::Changed("/m/b.mock.json".into()),
                WatchEvent::Added("/m/d.mock.json".into()),
            ]
        );
        assert!(diff(&after, &after).is_empty());
    }

    #[test]
    fn diff_removes_everything_under_deleted_directory() {
        let before = snapshot(&[
            ("/m/sub/a.mock.json", 1),
            ("/m/sub/b.mock.json", 1),
            ("/m/x.mock.json", 1),
        ]);
        let after = snapshot(&[("/m/x.mock.json", 1)]);
        let removed: Vec<_> = diff(&before, &after)
            .iter()
            .map(|e| e.path().to_path_buf())
            .collect();
        assert_eq!(
            removed,
            vec![PathBuf::from("/m/sub/a.mock.json"), PathBuf::from("/m/sub/b.mock.json")]
        );
    }

    #[tokio::test]
    async fn poll_scans_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.mock.json"), "{}").unwrap();
        std::fs::write(dir.path().join("sub").join("b.mock.jsonc"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let mut watcher = MockWatcher::new(dir.path(), "mock");
        let events = watcher.poll().await.unwrap();
        assert_eq!(
            events,
            vec![
                WatchEvent::Added(dir.path().join("a.mock.json")),
                WatchEvent::Added(dir.path().join("sub").join("b.mock.jsonc")),
            ]
        );
        assert!(watcher.poll().await.unwrap().is_empty());

        std::fs::remove_dir_all(dir.path().join("sub")).unwrap();
        assert_eq!(
            watcher.poll().await.unwrap(),
            vec![WatchEvent::Removed(dir.path().join("sub").join("b.mock.jsonc"))]
        );
    }
}
