use crate::UnpackError;
use std::path::{Component, Path, PathBuf};

/// Resolve an archive entry name against `destination`.
///
/// A relative `destination` is made absolute against the current directory
/// first. The joined path is normalized lexically and must end up strictly below
/// the normalized destination. Absolute names, `..` segments that climb out, and
/// names that collapse onto the destination itself are all rejected.
pub fn resolve_entry_path(destination: &Path, entry: &str) -> Result<PathBuf, UnpackError> {
    let base = normalized_destination(destination)?;
    let resolved = normalize(&base.join(entry));

    if resolved == base || !resolved.starts_with(&base) {
        return Err(UnpackError::PathTraversal {
            entry: entry.to_string(),
            resolved,
        });
    }
    Ok(resolved)
}

/// Absolute, lexically normalized form of `destination`.
pub(crate) fn normalized_destination(destination: &Path) -> Result<PathBuf, UnpackError> {
    let absolute = std::path::absolute(destination).map_err(UnpackError::io(destination))?;
    Ok(normalize(&absolute))
}

fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => match result.components().next_back() {
                Some(Component::Normal(_)) => {
                    result.pop();
                }
                // `..` at the root is the root.
                Some(Component::RootDir | Component::Prefix(_)) => {}
                // A relative path keeps the segments it cannot climb.
                _ => result.push(".."),
            },
            Component::CurDir => {}
            other => result.push(other.as_os_str()),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn base() -> &'static Path {
        if cfg!(windows) {
            Path::new("C:/work/app")
        } else {
            Path::new("/work/app")
        }
    }

    #[test]
    fn accepts_nested_entries() {
        let resolved = resolve_entry_path(base(), "assets/main.obb.png").unwrap();
        assert_eq!(resolved, base().join("assets").join("main.obb.png"));
    }

    #[test]
    fn collapses_inner_parent_segments() {
        let resolved = resolve_entry_path(base(), "a/./b/../c.txt").unwrap();
        assert_eq!(resolved, base().join("a").join("c.txt"));
    }

    #[test]
    fn rejects_parent_escape() {
        let err = resolve_entry_path(base(), "../../evil").unwrap_err();
        assert!(matches!(err, UnpackError::PathTraversal { .. }));
    }

    #[test]
    fn rejects_sibling_with_shared_prefix() {
        let err = resolve_entry_path(base(), "../app-other/file").unwrap_err();
        assert!(matches!(err, UnpackError::PathTraversal { .. }));
    }

    #[test]
    fn rejects_entry_resolving_to_destination() {
        let err = resolve_entry_path(base(), "a/..").unwrap_err();
        assert!(matches!(err, UnpackError::PathTraversal { .. }));
    }

    #[test]
    fn relative_destination_is_anchored_at_current_dir() {
        let cwd = std::env::current_dir().unwrap();
        let resolved = resolve_entry_path(Path::new("../out"), "a.txt").unwrap();
        assert!(resolved.is_absolute());
        assert_eq!(resolved, cwd.parent().unwrap().join("out").join("a.txt"));
    }

    #[test]
    fn normalize_keeps_leading_parent_segments() {
        assert_eq!(normalize(Path::new("../out")), Path::new("../out"));
        assert_eq!(normalize(Path::new("../../a/../b")), Path::new("../../b"));
        assert_eq!(normalize(Path::new("a/../../b")), Path::new("../b"));
        assert_eq!(normalize(Path::new("/../etc")), Path::new("/etc"));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_absolute_entry() {
        let err = resolve_entry_path(base(), "/etc/passwd").unwrap_err();
        match err {
            UnpackError::PathTraversal { entry, resolved } => {
                assert_eq!(entry, "/etc/passwd");
                assert_eq!(resolved, Path::new("/etc/passwd"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
