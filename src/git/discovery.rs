use std::collections::BTreeSet;
use std::path::PathBuf;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use walkdir::{DirEntry, WalkDir};

/// A directory to scan for repositories, and how many levels below it to look.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitRoot {
    pub path: PathBuf,
    pub max_depth: usize,
}

const SKIPPED_DIRS: &[&str] = &[
    "node_modules",
    "target",
    "build",
    "dist",
    "vendor",
    "Pods",
    "DerivedData",
    "__pycache__",
    "venv",
];

/// Descent filter. The root itself is always walked, whatever its name.
fn should_descend(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return true;
    }
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    !(name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref()))
}

/// Walk every root down to its depth limit. A directory containing `.git` is
/// recorded and not descended into. Missing roots are ignored.
pub fn discover_repositories(roots: &[GitRoot]) -> Vec<PathBuf> {
    let mut found = BTreeSet::new();
    for root in roots {
        if !root.path.is_dir() {
            debug!("Skipping missing git root {}", root.path.display());
            continue;
        }

        // Symlinked directories are not followed.
        let mut entries = WalkDir::new(&root.path)
            .max_depth(root.max_depth)
            .follow_links(false)
            .into_iter()
            .filter_entry(should_descend);

        while let Some(entry) = entries.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Cannot read under {}: {err}", root.path.display());
                    continue;
                }
            };
            if entry.path().join(".git").exists() {
                found.insert(entry.into_path());
                entries.skip_current_dir();
            }
        }
    }
    found.into_iter().collect()
}
