use thiserror::Error;

/// Sentinel for the top of the tree.
pub const ROOT: &str = "root";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("folder path is empty")]
    Empty,
    #[error("folder path contains an invalid segment: {0:?}")]
    InvalidSegment(String),
}

/// Validates a slash-delimited folder path before any cache write or
/// navigation. "root" is accepted as-is.
pub fn validate(path: &str) -> Result<(), PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    if path == ROOT {
        return Ok(());
    }
    for segment in path.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
            return Err(PathError::InvalidSegment(segment.to_string()));
        }
    }
    Ok(())
}

pub fn join(parent: &str, name: &str) -> String {
    if parent == ROOT {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub fn parent_of(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((parent, _)) => parent.to_string(),
        None => ROOT.to_string(),
    }
}

/// Proper ancestors of `path`, shallowest first, excluding the root
/// sentinel: `ancestors("A/B/C")` is `["A", "A/B"]`.
pub fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut end = 0;
    for (idx, ch) in path.char_indices() {
        if ch == '/' {
            out.push(path[..end].to_string());
        }
        end = idx + ch.len_utf8();
    }
    out
}

/// True when `key` is `root_path` itself or nested under it.
pub fn is_within(key: &str, root_path: &str) -> bool {
    key == root_path
        || key
            .strip_prefix(root_path)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Rewrites `key` from the `old` prefix to the `new` prefix, preserving the
/// nested remainder. Returns `None` when `key` is outside `old`.
pub fn rewrite_prefix(key: &str, old: &str, new: &str) -> Option<String> {
    if key == old {
        return Some(new.to_string());
    }
    key.strip_prefix(old)
        .and_then(|rest| rest.strip_prefix('/'))
        .map(|rest| format!("{new}/{rest}"))
}
