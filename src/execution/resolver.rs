//! Collision-free destination paths.
//!
//! Destinations are reserved in an in-memory set rather than probed on disk,
//! so a plan can be computed (and re-computed) before anything moves. For a
//! fixed processing order the output is fully deterministic.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Resolves `root/category/name.ext`, suffixing `-1`, `-2`, ... on collision
pub struct DestinationResolver;

impl DestinationResolver {
    /// Compute a destination not yet present in `used` and reserve it.
    ///
    /// `category` is a sanitized `/`-joined relative path, `extension`
    /// includes its leading dot (or is empty).
    pub fn resolve(
        root: &Path,
        category: &str,
        name: &str,
        extension: &str,
        used: &mut BTreeSet<String>,
    ) -> PathBuf {
        let dir = category
            .split('/')
            .filter(|s| !s.is_empty())
            .fold(root.to_path_buf(), |acc, segment| acc.join(segment));

        let mut candidate = dir.join(format!("{}{}", name, extension));
        let mut counter = 1u32;
        while used.contains(&Self::key(&candidate)) {
            candidate = dir.join(format!("{}-{}{}", name, counter, extension));
            counter += 1;
        }

        used.insert(Self::key(&candidate));
        candidate
    }

    /// Give a previously reserved destination back (used when a row is edited).
    pub fn release(destination: &Path, used: &mut BTreeSet<String>) -> bool {
        used.remove(&Self::key(destination))
    }

    /// Key under which a destination is stored in the used set.
    pub fn key(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }
}
