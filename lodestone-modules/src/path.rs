//! Canonical module paths and relative-specifier normalization.
//!
//! A canonical path is absolute: it begins with a single `/` and contains no
//! `.` or `..` segments. Normalization is idempotent, so canonicalizing an
//! already-canonical path returns it unchanged.

use crate::error::{ModuleError, Result};

/// Turn a non-relative path into its canonical absolute form: root it with a
/// leading `/` if the separator is missing and collapse any `.`/`..`
/// segments. Relative (`.`-prefixed) paths are rejected; they only make
/// sense against a requesting module's own path, see [`normalize`].
pub fn canonicalize(path: &str) -> Result<String> {
    if path.is_empty() {
        return Err(ModuleError::InvalidPath {
            path: path.to_string(),
            reason: "empty path".to_string(),
        });
    }
    if path.starts_with('.') {
        return Err(ModuleError::InvalidPath {
            path: path.to_string(),
            reason: "relative path has no base".to_string(),
        });
    }
    collapse(path, path.split('/'))
}

/// Resolve a dependency specifier against the requesting module's canonical
/// path. A specifier that does not start with `.` is treated as absolute; a
/// relative one is resolved against the base's directory (the base minus its
/// last segment).
pub fn normalize(spec: &str, base: &str) -> Result<String> {
    if spec.is_empty() {
        return Err(ModuleError::InvalidPath {
            path: spec.to_string(),
            reason: "empty dependency specifier".to_string(),
        });
    }
    if !spec.starts_with('.') {
        return canonicalize(spec);
    }

    let base = canonicalize(base)?;
    let mut segments: Vec<&str> = base.split('/').collect();
    segments.pop();
    segments.extend(spec.split('/'));
    collapse(spec, segments.into_iter())
}

/// Walk the segment list left to right, skipping `.` and empty segments and
/// letting `..` remove the previously retained segment. `..` walking past
/// the root is an error.
fn collapse<'a>(original: &str, segments: impl Iterator<Item = &'a str>) -> Result<String> {
    let mut kept: Vec<&str> = Vec::new();
    for segment in segments {
        match segment {
            "" | "." => {}
            ".." => {
                if kept.pop().is_none() {
                    return Err(ModuleError::InvalidPath {
                        path: original.to_string(),
                        reason: "path escapes the root".to_string(),
                    });
                }
            }
            segment => kept.push(segment),
        }
    }
    Ok(format!("/{}", kept.join("/")))
}
