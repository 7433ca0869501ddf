//! Write-path validation.
//!
//! A path is writable when, after resolving symlinks through the longest
//! existing ancestor, it falls under one of the policy's allowed write paths
//! (case-normalized comparison) and contains no excluded directory
//! component. Globs are honored in allowlist entries.

use std::path::{Component, Path, PathBuf};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolve a write target to an absolute, symlink-free path.
///
/// The target usually does not exist yet, so the longest existing ancestor
/// is canonicalized and the remaining components are appended. Raw `..`
/// components are rejected before any resolution.
pub fn resolve_write_path(requested: &Path) -> Result<PathBuf, String> {
    if requested.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err("path must not contain '..' components".to_owned());
    }

    let absolute = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| format!("cannot determine working directory: {e}"))?
            .join(requested)
    };

    if absolute.exists() {
        return absolute
            .canonicalize()
            .map_err(|e| format!("cannot resolve '{}': {e}", absolute.display()));
    }

    // Walk up to the nearest existing ancestor, canonicalize it, and
    // re-append the missing tail.
    let mut existing = absolute.as_path();
    let mut tail: Vec<&std::ffi::OsStr> = Vec::new();
    loop {
        if existing.exists() {
            break;
        }
        match existing.parent() {
            Some(parent) => {
                if let Some(name) = existing.file_name() {
                    tail.push(name);
                }
                existing = parent;
            }
            None => break,
        }
    }
    let mut resolved = existing
        .canonicalize()
        .map_err(|e| format!("cannot resolve ancestor of '{}': {e}", absolute.display()))?;
    for part in tail.into_iter().rev() {
        resolved.push(part);
    }
    Ok(resolved)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Allowlist checks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn normalize(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

/// Whether any component of `path` is one of the excluded directory names.
pub fn is_excluded(path: &Path, excluded_dirs: &[String]) -> bool {
    path.components().any(|c| {
        let Component::Normal(name) = c else {
            return false;
        };
        let name = name.to_string_lossy().to_lowercase();
        excluded_dirs.iter().any(|ex| ex.to_lowercase() == name)
    })
}

/// Whether a resolved path falls under the allowlist and avoids excluded
/// directories. Allowlist entries are absolute prefixes, optionally with
/// glob syntax.
pub fn path_allowed(resolved: &Path, allowlist: &[String], excluded_dirs: &[String]) -> bool {
    if is_excluded(resolved, excluded_dirs) {
        return false;
    }
    let normalized = normalize(resolved);
    allowlist.iter().any(|entry| {
        let entry_norm = entry.to_lowercase();
        if entry_norm.contains('*') || entry_norm.contains('?') || entry_norm.contains('[') {
            glob::Pattern::new(&entry_norm)
                .map(|p| p.matches(&normalized))
                .unwrap_or(false)
        } else {
            let prefix = entry_norm.trim_end_matches('/');
            normalized == prefix || normalized.starts_with(&format!("{prefix}/"))
        }
    })
}
