use std::path::{Component, Path, PathBuf};

/// Enumerates every regular file under `root`, returning paths relative to
/// it. Subdirectories are walked depth-first; the result is sorted so one
/// iteration visits files in a stable order. Symlinks are not followed.
pub async fn collect_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                if let Ok(rel) = entry.path().strip_prefix(root) {
                    files.push(rel.to_path_buf());
                }
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Maps a relative source path under the remote target folder, always with
/// forward slashes. Path traversal components are dropped rather than
/// allowed to escape the target folder.
pub fn remote_path_for(target_folder: &str, rel_path: &Path) -> String {
    let mut out = target_folder.trim_end_matches('/').to_string();
    for component in rel_path.components() {
        if let Component::Normal(part) = component {
            out.push('/');
            out.push_str(&part.to_string_lossy());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collects_nested_files_relative_to_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::create_dir_all(dir.path().join("sub/deep")).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"b").unwrap();
        std::fs::write(dir.path().join("sub/deep/c.txt"), b"c").unwrap();

        let files = collect_files(dir.path()).await.unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from("a.txt"),
                PathBuf::from("sub/b.txt"),
                PathBuf::from("sub/deep/c.txt"),
            ]
        );
    }

    #[tokio::test]
    async fn empty_directories_yield_no_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("only/dirs")).unwrap();
        assert!(collect_files(dir.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("nope");
        assert!(collect_files(&gone).await.is_err());
    }

    #[test]
    fn joins_remote_paths_with_forward_slashes() {
        assert_eq!(
            remote_path_for("/remote/in", Path::new("sub/report.csv")),
            "/remote/in/sub/report.csv"
        );
        assert_eq!(
            remote_path_for("/remote/in/", Path::new("report.csv")),
            "/remote/in/report.csv"
        );
    }

    #[test]
    fn drops_traversal_components() {
        assert_eq!(
            remote_path_for("/remote/in", Path::new("../escape.txt")),
            "/remote/in/escape.txt"
        );
    }
}
