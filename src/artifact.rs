//! Artifact files: naming, durable writes, and read-time path containment.
//!
//! The worker and the reaper both derive artifact locations through
//! [`artifact_path`], so a job id always maps to exactly one file.

use crate::job::JobId;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

const MAX_STEM_LEN: usize = 100;

/// Deterministic artifact location for a job.
pub fn artifact_path(output_dir: &Path, job_id: JobId, extension: &str) -> PathBuf {
    output_dir.join(format!("{}.{}", job_id, extension))
}

/// Writes `bytes` to `target` so that the file is either absent or complete.
///
/// Data goes to a temporary file in the same directory, is flushed to disk,
/// then renamed over `target`. Nothing is observable at `target` until the
/// rename succeeds.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = target
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "artifact path has no parent"))?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;

    #[cfg(unix)]
    {
        // Persist the rename itself.
        if let Ok(dir) = std::fs::File::open(dir) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

/// Removes a file, treating "already gone" as success.
///
/// Returns `true` if this call removed the file.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Error)]
pub enum ContainmentError {
    /// The path escapes the output directory.
    #[error("path {} is outside the output directory", .0.display())]
    Outside(PathBuf),

    /// The path is contained but cannot be resolved (usually: reaped).
    #[error("artifact unavailable: {0}")]
    Unavailable(#[source] io::Error),
}

/// Resolves `candidate` and checks it is a file strictly inside `base`.
///
/// `base` must already be canonical. The check is done twice: lexically on
/// the stored path (absolute, no `..`, prefix of `base`), and again after
/// canonicalization so a symlink inside the directory cannot point out of it.
/// Prefix checks compare whole path components, never string prefixes.
pub fn resolve_contained(base: &Path, candidate: &Path) -> Result<PathBuf, ContainmentError> {
    let lexical = normalize_lexically(candidate)
        .ok_or_else(|| ContainmentError::Outside(candidate.to_path_buf()))?;
    if lexical == base || !lexical.starts_with(base) {
        return Err(ContainmentError::Outside(candidate.to_path_buf()));
    }

    let canonical = lexical
        .canonicalize()
        .map_err(ContainmentError::Unavailable)?;
    if canonical == base || !canonical.starts_with(base) {
        return Err(ContainmentError::Outside(candidate.to_path_buf()));
    }
    Ok(canonical)
}

/// Drops `.` components. Returns `None` for relative paths and for any path
/// containing `..`.
fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    if !path.is_absolute() {
        return None;
    }
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                out.push(component.as_os_str())
            }
            Component::CurDir => {}
            Component::ParentDir => return None,
        }
    }
    Some(out)
}

/// Builds the attachment filename for a job's artifact.
///
/// Only the final path segment of the client-supplied name is used; its
/// extension is replaced by the output extension and anything outside
/// `[A-Za-z0-9._-]` collapses to `_`. Falls back to the job id.
pub fn safe_download_name(input_name: Option<&str>, extension: &str, job_id: JobId) -> String {
    let extension: String = extension
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();

    let stem = input_name
        .map(|name| name.rsplit(['/', '\\']).next().unwrap_or(name))
        .map(|base| match base.rfind('.') {
            Some(idx) if idx > 0 => &base[..idx],
            _ => base,
        })
        .map(sanitize_stem)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| job_id.to_string());

    if extension.is_empty() {
        stem
    } else {
        format!("{}.{}", stem, extension)
    }
}

fn sanitize_stem(input: &str) -> String {
    let mut result = String::with_capacity(input.len().min(MAX_STEM_LEN));
    let mut last_was_replacement = false;

    for c in input.chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' {
            result.push(c);
            last_was_replacement = false;
        } else if !last_was_replacement {
            result.push('_');
            last_was_replacement = true;
        }
        if result.len() >= MAX_STEM_LEN {
            break;
        }
    }

    result.trim_matches(|c| c == '.' || c == '_').to_string()
}
