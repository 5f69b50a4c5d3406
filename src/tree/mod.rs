//! Directory trees as a flat, length-prefixed entry stream

pub mod materialize;
pub mod serialize;

pub use materialize::receive_tree;
pub use serialize::send_tree;

/// What one tree transfer moved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub files: u64,
    pub directories: u64,
    pub bytes: u64,
}

/// Map of every path under `root` to its contents (`None` for directories).
#[cfg(test)]
pub(crate) fn snapshot(
    root: &std::path::Path,
) -> std::collections::BTreeMap<std::path::PathBuf, Option<Vec<u8>>> {
    walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|e| e.unwrap())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
            let body = if e.file_type().is_file() {
                Some(std::fs::read(e.path()).unwrap())
            } else {
                None
            };
            (rel, body)
        })
        .collect()
}
