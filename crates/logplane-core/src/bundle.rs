//! Test bundles published next to alert rules.
//!
//! Every regular file under the tests directory is shipped verbatim, keyed
//! by its path relative to that directory.

use std::path::Path;

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::relation::TestsData;

pub fn load_test_bundle(root: &Path) -> TestsData {
    let mut bundle = TestsData::default();
    if !root.is_dir() {
        debug!(?root, "tests directory absent");
        return bundle;
    }
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) if entry.file_type().is_file() => entry,
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "skipping unreadable tests entry");
                continue;
            }
        };
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        match std::fs::read_to_string(entry.path()) {
            Ok(content) => {
                bundle
                    .tests
                    .insert(rel.to_string_lossy().replace('\\', "/"), content);
            }
            Err(e) => warn!(path = ?entry.path(), error = %e, "skipping unreadable test file"),
        }
    }
    bundle
}
