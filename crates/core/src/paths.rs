//! Lexical path helpers shared by the filter and archive crates

use std::path::{Component, Path, PathBuf};

/// Lexically normalize a path
///
/// - Removes `.` components
/// - Resolves `..` against the preceding component (never above the root)
/// - Collapses repeated separators
///
/// Symlinks are not consulted, matching how walk paths are compared.
pub fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = match out.components().next_back() {
                    Some(Component::Normal(_)) => out.pop(),
                    Some(Component::RootDir) | Some(Component::Prefix(_)) => true,
                    _ => false,
                };
                if !popped {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() && !path.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// The cleaned absolute form of a path, relative to the current directory
///
/// Falls back to the cleaned input if the current directory is unavailable.
pub fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return clean(path);
    }
    match std::env::current_dir() {
        Ok(cwd) => clean(&cwd.join(path)),
        Err(_) => clean(path),
    }
}

/// Resolve `path` against `base` unless it is already absolute
pub fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        clean(path)
    } else {
        clean(&base.join(path))
    }
}

/// Drop any root or drive prefix, keeping the normal components
///
/// `/data/a.txt` becomes `data/a.txt`; archive entry names are stored this way.
/// `.` and `..` are dropped too, so names read back from an archive must be
/// checked with [`has_parent_dir`] first.
pub fn strip_root(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

/// Whether `path` contains a `..` component
pub fn has_parent_dir(path: &Path) -> bool {
    path.components().any(|c| c == Component::ParentDir)
}
