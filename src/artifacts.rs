//! Locating and pruning replica-side image artifacts.
//!
//! An overlay image on the slave volume is stored as a data file named
//! after its image id, next to sidecar files sharing the prefix
//! (`<id>.lease`, `<id>.meta`). All of them have to go together.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::registry::DiskImageId;

/// Lazily yields every file under `root` whose name starts with `image_id`.
///
/// Directories are never yielded. Entries that cannot be read are logged
/// and skipped. The walk is finite and cannot be restarted. A blank
/// `image_id` matches nothing.
pub fn find<'a>(image_id: &'a str, root: &'a Path) -> impl Iterator<Item = PathBuf> + 'a {
    let usable = is_usable(image_id);
    WalkDir::new(root)
        .max_depth(if usable { usize::MAX } else { 0 })
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(found) => Some(found),
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(move |entry| {
            usable
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with(image_id))
        })
        .map(walkdir::DirEntry::into_path)
}

/// Deletes every artifact of each image under `root`, returning how many
/// files were removed.
///
/// Deletion failures are logged and do not stop the sweep; an image with
/// no matching files is logged as absent.
pub fn remove_artifacts(image_ids: &[DiskImageId], root: &Path) -> usize {
    let mut removed = 0;
    for image_id in image_ids {
        if !is_usable(image_id.as_str()) {
            warn!(image = ?image_id.as_str(), "refusing to sweep for a blank image id");
            continue;
        }
        let mut matched = false;
        for path in find(image_id.as_str(), root) {
            matched = true;
            match fs::remove_file(&path) {
                Ok(()) => {
                    info!(image = %image_id, path = %path.display(), "removed replica artifact");
                    removed += 1;
                }
                Err(err) => {
                    warn!(image = %image_id, path = %path.display(), error = %err, "failed to remove replica artifact");
                }
            }
        }
        if !matched {
            debug!(image = %image_id, root = %root.display(), "no replica artifacts found");
        }
    }
    removed
}

fn is_usable(image_id: &str) -> bool {
    !image_id.trim().is_empty()
}
