//! Folder scanning: turns a directory tree into a [`WorkPlan`] of per-subfolder buckets.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::contract::MediaKind;

/// Extensions (lowercase, without the dot) that are uploaded as photos.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "webp", "svg"];

/// Errors that abort a run before any transport happens.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("folder is empty: {}", .0.display())]
    EmptyFolder(PathBuf),
}

/// A discovered file. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkItem {
    pub absolute_path: PathBuf,
    /// Path relative to the scanned root, `/`-separated.
    pub relative_path: String,
    pub size_bytes: u64,
    pub kind: MediaKind,
}

impl WorkItem {
    pub fn file_name(&self) -> String {
        self.absolute_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.relative_path.clone())
    }

    /// Name of the directory that directly contains the file, `None` at the root.
    pub fn parent_folder_name(&self) -> Option<&str> {
        let (parent, _) = self.relative_path.rsplit_once('/')?;
        Some(parent.rsplit('/').next().unwrap_or(parent))
    }
}

/// Files of one directory, split by kind and ordered by file name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubfolderBucket {
    /// Directory path relative to the root; `""` for the root itself.
    pub relative_path: String,
    pub images: Vec<WorkItem>,
    pub documents: Vec<WorkItem>,
}

impl SubfolderBucket {
    fn new(relative_path: String) -> Self {
        Self {
            relative_path,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.images.len() + self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Classified snapshot of a folder tree, iterated in lexicographic key order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkPlan {
    pub root: PathBuf,
    pub buckets: BTreeMap<String, SubfolderBucket>,
}

impl WorkPlan {
    pub fn total_items(&self) -> usize {
        self.buckets.values().map(SubfolderBucket::len).sum()
    }

    pub fn bucket(&self, key: &str) -> Option<&SubfolderBucket> {
        self.buckets.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SubfolderBucket)> {
        self.buckets.iter()
    }

    pub fn non_empty_buckets(&self) -> usize {
        self.buckets.values().filter(|b| !b.is_empty()).count()
    }

    /// Display name of the scanned folder (last path component).
    pub fn folder_name(&self) -> String {
        folder_display_name(&self.root)
    }
}

pub fn folder_display_name(root: &Path) -> String {
    let absolute = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    absolute
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| absolute.display().to_string())
}

/// Decide the media kind from the file extension, case-insensitively.
pub fn classify_path(path: &Path) -> MediaKind {
    let is_image = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false);
    if is_image {
        MediaKind::Image
    } else {
        MediaKind::Document
    }
}

fn relative_key(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Recursively scan `root` and build a [`WorkPlan`].
///
/// Every visited directory gets a bucket, even when it holds no files. Entries that are
/// not regular files once symlinks are resolved are left out silently. Unreadable
/// subdirectories are logged and skipped.
pub fn scan_folder(root: &Path) -> Result<WorkPlan, SetupError> {
    if !root.is_dir() {
        warn!(path = %root.display(), "[SCAN] Root is not a directory");
        return Err(SetupError::NotADirectory(root.to_path_buf()));
    }
    info!(path = %root.display(), "[SCAN] Scanning folder");

    let mut buckets: BTreeMap<String, SubfolderBucket> = BTreeMap::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "[SCAN] Skipping unreadable entry");
                continue;
            }
        };
        let path = entry.path();
        let rel = path.strip_prefix(root).unwrap_or(path);

        if entry.file_type().is_dir() {
            let key = relative_key(rel);
            buckets
                .entry(key.clone())
                .or_insert_with(|| SubfolderBucket::new(key));
            continue;
        }

        // Follows symlinks: broken links and links to directories drop out here.
        let metadata = match std::fs::metadata(path) {
            Ok(m) if m.is_file() => m,
            _ => {
                debug!(path = %path.display(), "[SCAN] Ignoring non-file entry");
                continue;
            }
        };

        let parent_key = rel.parent().map(relative_key).unwrap_or_default();
        let item = WorkItem {
            absolute_path: path.to_path_buf(),
            relative_path: relative_key(rel),
            size_bytes: metadata.len(),
            kind: classify_path(path),
        };
        let bucket = buckets
            .entry(parent_key.clone())
            .or_insert_with(|| SubfolderBucket::new(parent_key));
        match item.kind {
            MediaKind::Image => bucket.images.push(item),
            MediaKind::Document => bucket.documents.push(item),
        }
    }

    let plan = WorkPlan {
        root: root.to_path_buf(),
        buckets,
    };
    info!(
        files = plan.total_items(),
        subfolders = plan.buckets.len(),
        "[SCAN] Found {} total files in {} subfolders",
        plan.total_items(),
        plan.buckets.len()
    );
    Ok(plan)
}
