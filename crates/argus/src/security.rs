//! Path validation applied at every filesystem-facing entry point.
//!
//! Registration (`watch`), multi-source file loading, and audit output
//! configuration all pass caller-supplied paths through
//! [`validate_watchable_path`] before touching the filesystem. Rejection
//! messages never echo the path itself, so a hostile path cannot inject
//! content into logs or audit records.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// System locations a configuration watcher has no business touching.
///
/// Best-effort heuristic: exact matches and prefix matches after symlink
/// resolution where the OS permits cheap introspection.
#[cfg(unix)]
const SENSITIVE_PREFIXES: &[&str] = &["/proc", "/sys", "/dev", "/root/.ssh"];

#[cfg(unix)]
const SENSITIVE_FILES: &[&str] = &[
    "/etc/shadow",
    "/etc/gshadow",
    "/etc/sudoers",
    "/etc/passwd",
];

#[cfg(windows)]
const SENSITIVE_PREFIXES: &[&str] = &["C:\\Windows\\System32", "C:\\Windows\\SysWOW64"];

#[cfg(windows)]
const SENSITIVE_FILES: &[&str] = &[];

/// Validates that a caller-supplied path is safe to watch, load, or write.
///
/// Rejects:
/// - empty paths,
/// - paths containing a NUL byte,
/// - paths whose lexically normalized form ascends above their own root,
/// - paths resolving to a sensitive system location (best effort).
///
/// # Errors
///
/// Returns [`Error::Security`] with the offending path omitted from the
/// message.
pub fn validate_watchable_path(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(Error::security("path is empty"));
    }

    if path.as_os_str().as_encoded_bytes().contains(&0) {
        return Err(Error::security("path contains a NUL byte"));
    }

    if escapes_root(path) {
        return Err(Error::security("path escapes its root after normalization"));
    }

    // Resolve symlinks where possible so a link into /proc or /etc/shadow
    // is caught; a path that does not exist yet is checked lexically.
    let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| lexical_clean(path));
    if is_sensitive(&resolved) {
        return Err(Error::security(
            "path resolves to a protected system location",
        ));
    }

    Ok(())
}

/// Returns `true` when `..` components ascend above the path's own root.
fn escapes_root(path: &Path) -> bool {
    let mut depth: i64 = 0;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return true;
                }
            }
            Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
        }
    }
    false
}

/// Lexically removes `.` and resolves `..` without touching the filesystem.
fn lexical_clean(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                cleaned.pop();
            }
            Component::CurDir => {}
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

fn is_sensitive(resolved: &Path) -> bool {
    for file in SENSITIVE_FILES {
        if resolved == Path::new(file) {
            return true;
        }
    }
    for prefix in SENSITIVE_PREFIXES {
        if resolved.starts_with(prefix) {
            return true;
        }
    }
    false
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_path_rejected() {
        let err = validate_watchable_path(Path::new("")).unwrap_err();
        assert_eq!(err.code(), "SecurityError");
    }

    #[test]
    fn test_traversal_above_root_rejected() {
        assert!(validate_watchable_path(Path::new("../outside.json")).is_err());
        assert!(validate_watchable_path(Path::new("a/../../outside.json")).is_err());
        assert!(validate_watchable_path(Path::new("/etc/app/../../../escape.json")).is_err());
    }

    #[test]
    fn test_internal_parent_components_allowed() {
        assert!(validate_watchable_path(Path::new("configs/../configs/app.json")).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_sensitive_locations_rejected() {
        assert!(validate_watchable_path(Path::new("/etc/shadow")).is_err());
        assert!(validate_watchable_path(Path::new("/proc/self/environ")).is_err());
        assert!(validate_watchable_path(Path::new("/sys/kernel/config")).is_err());
    }

    #[test]
    fn test_regular_paths_accepted() {
        assert!(validate_watchable_path(Path::new("/tmp/app/config.yaml")).is_ok());
        assert!(validate_watchable_path(Path::new("config.toml")).is_ok());
    }

    #[test]
    fn test_rejection_message_omits_path() {
        let err = validate_watchable_path(Path::new("/proc/self/mem")).unwrap_err();
        assert!(!err.to_string().contains("/proc"));
    }

    #[test]
    fn test_lexical_clean() {
        assert_eq!(
            lexical_clean(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
    }
}
