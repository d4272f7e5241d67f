use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use percent_encoding::percent_decode_str;

use crate::error::{Error, Result};
use crate::logging::LoggingExt;

/// Maps a raw request target to an index key: query and fragment removed,
/// percent-decoded, `.`/`..` segments folded, no leading or trailing slash.
/// Directory requests (empty or ending in `/`) get `index` appended.
pub fn normalize_request_path(target: &str, index: &str) -> Result<String> {
    let path = target.split(['?', '#']).next().unwrap_or(target);
    let bad_request = |reason: String| Error::BadRequestPath {
        path: target.to_string(),
        reason,
    };

    if let Some(pos) = malformed_escape(path) {
        return Err(bad_request(format!("malformed escape at byte {}", pos)));
    }
    let decoded = percent_decode_str(path)
        .decode_utf8()
        .map_err(|e| bad_request(e.to_string()))?;

    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() || decoded.ends_with('/') {
        segments.push(index);
    }
    let normalized = segments.join("/");
    log::trace!("Normalized {} to {}", target, normalized);
    Ok(normalized)
}

/// Position of the first `%` not followed by two hex digits.
fn malformed_escape(path: &str) -> Option<usize> {
    let bytes = path.as_bytes();
    bytes.iter().enumerate().find_map(|(pos, &b)| {
        let valid = b != b'%'
            || matches!(
                bytes.get(pos + 1..pos + 3),
                Some([hi, lo]) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit()
            );
        (!valid).then_some(pos)
    })
}

/// Resolves `relative` under `base_dir`, refusing anything that canonicalizes
/// outside of it. Missing files yield `Ok(None)`.
pub fn contain_path(base_dir: &Path, relative: &str) -> io::Result<Option<PathBuf>> {
    let canonical_base = base_dir.log_operation("canonicalize", || fs::canonicalize(base_dir))?;
    let requested_path = canonical_base.join(relative);

    match fs::canonicalize(&requested_path) {
        Ok(path) if path.starts_with(&canonical_base) => Ok(Some(path)),
        Ok(path) => {
            log::warn!("Path escapes base directory: {}", path.display());
            Ok(None)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::debug!("Not found: {}", requested_path.display());
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
