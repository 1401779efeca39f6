//! Discovery of GeoTIFFs under the local raster root.

use std::path::{Component, Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

/// File extensions considered GeoTIFFs (case-insensitive)
const EXTENSIONS: &[&str] = &["tif", "tiff"];

fn is_geotiff(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(ext)))
}

/// Source identifiers (paths relative to `root`, `/`-separated) of every
/// GeoTIFF below `root`, sorted.
pub fn scan(root: &Path) -> Vec<String> {
    if !root.is_dir() {
        warn!(root = %root.display(), "raster root is not a directory");
        return Vec::new();
    }

    let mut found: Vec<String> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file() && is_geotiff(entry.path()))
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(root).ok()?;
            let parts: Option<Vec<&str>> = relative
                .components()
                .map(|c| match c {
                    Component::Normal(s) => s.to_str(),
                    _ => None,
                })
                .collect();
            Some(parts?.join("/"))
        })
        .collect();

    found.sort();
    found
}

/// Resolve a source identifier to a path inside `root`.
///
/// Only plain relative paths are accepted: absolute paths, `..`, and
/// Windows prefixes never resolve, so a request cannot leave the root.
#[must_use]
pub fn resolve(root: &Path, identifier: &str) -> Option<PathBuf> {
    if identifier.is_empty() || identifier.contains('\0') || identifier.contains('\\') {
        return None;
    }
    let relative = Path::new(identifier);
    let mut path = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (path != root).then_some(path)
}
