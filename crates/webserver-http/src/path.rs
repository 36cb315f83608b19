use std::path::{Path, PathBuf};

use crate::error::PathError;

/// Resolves a request path under `document_root`, which must already be
/// canonicalized (the server canonicalizes it once at startup).
///
/// The request path is always an absolute-path reference per HTTP
/// (`GET /foo HTTP/1.0`); joining it onto `document_root` verbatim would
/// let `PathBuf::join` discard the root entirely, since joining an
/// absolute path replaces the base. The leading slash(es) are stripped
/// first so the join stays relative to the root.
///
/// Security invariant (E1, P5): the canonicalized result must remain
/// under `document_root`. The source compares this as a string prefix;
/// this resolves it one path component at a time via
/// [`Path::starts_with`], which is strictly safer (immune to a sibling
/// directory like `/srv-evil` matching a string prefix of `/srv`) while
/// still satisfying the same invariant for every path this accepts.
pub fn resolve(document_root: &Path, request_path: &str) -> Result<PathBuf, PathError> {
    let relative = request_path.trim_start_matches('/');
    let joined = document_root.join(relative);

    let canonical = joined.canonicalize().map_err(PathError::NotFound)?;

    if !canonical.starts_with(document_root) {
        return Err(PathError::Escape);
    }

    Ok(canonical)
}

/// `true` only for a regular file; the caller treats anything else —
/// directory, device, missing — as `404` (the resolver itself does not
/// stat, per §4.E).
pub fn is_regular_file(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|meta| meta.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        (dir, root)
    }

    #[test]
    fn resolves_a_file_under_the_root() {
        let (dir, root) = root();
        std::fs::write(dir.path().join("hello.txt"), b"hi\n").unwrap();

        let resolved = resolve(&root, "/hello.txt").unwrap();
        assert_eq!(resolved, root.join("hello.txt"));
        assert!(is_regular_file(&resolved));
    }

    #[test]
    fn rejects_traversal_above_the_root() {
        let (_dir, root) = root();
        let err = resolve(&root, "/../etc/passwd").unwrap_err();
        assert!(matches!(err, PathError::NotFound(_) | PathError::Escape));
    }

    #[test]
    fn rejects_traversal_that_happens_to_canonicalize_inside_an_existing_sibling() {
        let (dir, root) = root();
        let parent = dir.path().parent().unwrap();
        let sibling = parent.join(format!("{}-evil", dir.path().file_name().unwrap().to_str().unwrap()));
        std::fs::create_dir_all(&sibling).unwrap();
        std::fs::write(sibling.join("secret.txt"), b"nope").unwrap();

        let traversal = format!("/../{}/secret.txt", sibling.file_name().unwrap().to_str().unwrap());
        let err = resolve(&root, &traversal).unwrap_err();
        assert!(matches!(err, PathError::Escape));

        std::fs::remove_dir_all(&sibling).ok();
    }

    #[test]
    fn missing_file_is_not_found() {
        let (_dir, root) = root();
        assert!(matches!(resolve(&root, "/nope.txt"), Err(PathError::NotFound(_))));
    }

    #[test]
    fn directories_are_not_regular_files() {
        let (dir, root) = root();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let resolved = resolve(&root, "/sub").unwrap();
        assert!(!is_regular_file(&resolved));
    }
}
