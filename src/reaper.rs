use std::fs;
use std::path::{Path, PathBuf};

use camino::Utf8Path;
use tracing::{debug, warn};

/// Removes directories under `root` that hold neither files nor
/// subdirectories, repeating until removals stop exposing new empty parents.
/// `root` itself is kept. Returns the removed directories in removal order.
pub fn reap_empty_dirs(root: &Utf8Path) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    loop {
        let empty = find_empty_dirs(root.as_std_path());
        if empty.is_empty() {
            break;
        }
        let mut progressed = false;
        for dir in empty {
            // `remove_dir` refuses non-empty directories, so a file that
            // appears mid-pass is never lost.
            match fs::remove_dir(&dir) {
                Ok(()) => {
                    debug!(path = %dir.display(), "removed empty directory");
                    removed.push(dir);
                    progressed = true;
                }
                Err(err) => warn!(path = %dir.display(), error = %err, "could not remove directory"),
            }
        }
        if !progressed {
            break;
        }
    }
    removed
}

fn find_empty_dirs(root: &Path) -> Vec<PathBuf> {
    let mut empty = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(path = %dir.display(), error = %err, "could not scan directory");
                continue;
            }
        };
        let mut has_entries = false;
        for entry in entries.flatten() {
            has_entries = true;
            let path = entry.path();
            let is_dir = entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false);
            if is_dir {
                stack.push(path);
            }
        }
        if !has_entries && dir != root {
            empty.push(dir);
        }
    }
    empty
}
