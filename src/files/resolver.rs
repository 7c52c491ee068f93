//! Lexical path resolution.
//!
//! Turns a request target into a path under a base directory using string
//! logic only. Nothing here touches the filesystem, so an escaping path is
//! rejected before any file under it could be opened.

use percent_encoding::percent_decode_str;
use std::path::{Path, PathBuf};

use crate::error::HttpError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("path escapes the served directory")]
    Traversal,
    #[error("malformed path: {0}")]
    Malformed(&'static str),
}

impl From<Rejection> for HttpError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Traversal => HttpError::Forbidden(rejection.to_string()),
            Rejection::Malformed(_) => HttpError::BadRequest(rejection.to_string()),
        }
    }
}

/// A path known to lie inside its base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    path: PathBuf,
    segments: usize,
}

impl ResolvedPath {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the request named the base directory itself.
    pub fn is_base(&self) -> bool {
        self.segments == 0
    }

    pub fn join(&self, name: &str) -> ResolvedPath {
        ResolvedPath {
            path: self.path.join(name),
            segments: self.segments + 1,
        }
    }
}

/// Resolves `target` (a raw request path) against `base`.
///
/// Query and fragment are dropped, the rest is percent-decoded and its
/// `.`/`..` segments are collapsed. A `..` that would climb above `base`
/// yields [`Rejection::Traversal`] whether or not the target exists.
pub fn resolve(base: &Path, target: &str) -> Result<ResolvedPath, Rejection> {
    let raw = target
        .split(['?', '#'])
        .next()
        .unwrap_or_default();

    if !raw.starts_with('/') {
        return Err(Rejection::Malformed("path must be absolute"));
    }

    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|_| Rejection::Malformed("path is not valid UTF-8"))?;

    if decoded.contains('\0') {
        return Err(Rejection::Malformed("path contains a NUL byte"));
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop().ok_or(Rejection::Traversal)?;
            }
            name => segments.push(name),
        }
    }

    let mut path = base.to_path_buf();
    path.extend(&segments);

    Ok(ResolvedPath {
        path,
        segments: segments.len(),
    })
}
