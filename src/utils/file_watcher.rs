use anyhow::Result;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};

use crate::constants::SUPPORTED_EXTENSIONS;

/// Source file changes that make cached contexts obsolete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Modified(Vec<PathBuf>),
    Deleted(Vec<PathBuf>),
}

impl FileEvent {
    pub fn paths(&self) -> &[PathBuf] {
        match self {
            FileEvent::Modified(paths) | FileEvent::Deleted(paths) => paths,
        }
    }
}

/// Watches a project tree so the server can drop stale contexts
pub struct FileSystemWatcher {
    _watcher: RecommendedWatcher,
    rx: Receiver<Result<Event, notify::Error>>,
}

impl FileSystemWatcher {
    /// Create a new file system watcher for the given path
    pub fn new(path: &Path) -> Result<Self> {
        let (tx, rx) = mpsc::channel();

        let mut watcher = notify::recommended_watcher(move |event| {
            let _ = tx.send(event);
        })?;

        watcher.watch(path, RecursiveMode::Recursive)?;

        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Drain pending events (non-blocking)
    pub fn check_events(&self) -> Vec<FileEvent> {
        let mut events = Vec::new();

        while let Ok(Ok(event)) = self.rx.try_recv() {
            let paths: Vec<PathBuf> = event
                .paths
                .into_iter()
                .filter(|p| !Self::should_ignore_path(p))
                .collect();
            if paths.is_empty() {
                continue;
            }

            match event.kind {
                // A rewrite through a temp file shows up as a create
                EventKind::Create(_) => events.push(FileEvent::Modified(paths)),
                EventKind::Modify(modify_kind) => {
                    use notify::event::ModifyKind;
                    match modify_kind {
                        ModifyKind::Data(_) | ModifyKind::Any | ModifyKind::Name(_) => {
                            events.push(FileEvent::Modified(paths))
                        },
                        _ => {}, // Ignore metadata changes
                    }
                },
                EventKind::Remove(_) => events.push(FileEvent::Deleted(paths)),
                _ => {},
            }
        }

        events
    }

    /// Only source files we can extract context from are interesting
    pub fn should_ignore_path(path: &Path) -> bool {
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if name.starts_with('.') {
                return true;
            }
        }

        let in_build_dir = path.components().any(|c| {
            matches!(
                c.as_os_str().to_str(),
                Some(
                    "target"
                        | "node_modules"
                        | "__pycache__"
                        | ".git"
                        | "dist"
                        | "build"
                        | ".venv"
                        | "venv"
                )
            )
        });
        if in_build_dir {
            return true;
        }

        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => !SUPPORTED_EXTENSIONS.contains(&ext),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_should_ignore_path() {
        assert!(FileSystemWatcher::should_ignore_path(Path::new(".gitignore")));
        assert!(FileSystemWatcher::should_ignore_path(Path::new(
            "node_modules/pkg/index.js"
        )));
        assert!(FileSystemWatcher::should_ignore_path(Path::new(
            "target/debug/build/out.rs"
        )));
        assert!(FileSystemWatcher::should_ignore_path(Path::new("README.md")));
        assert!(FileSystemWatcher::should_ignore_path(Path::new("LICENSE")));

        assert!(!FileSystemWatcher::should_ignore_path(Path::new("src/main.rs")));
        assert!(!FileSystemWatcher::should_ignore_path(Path::new("app/view.tsx")));
        assert!(!FileSystemWatcher::should_ignore_path(Path::new("tools/gen.py")));
    }

    #[test]
    fn test_event_paths() {
        let event = FileEvent::Deleted(vec![PathBuf::from("a.rs")]);
        assert_eq!(event.paths(), &[PathBuf::from("a.rs")]);
    }

    #[test]
    fn test_watcher_starts_quiet() {
        let temp_dir = TempDir::new().unwrap();
        let watcher = FileSystemWatcher::new(temp_dir.path()).unwrap();
        assert!(watcher.check_events().is_empty());
    }
}
