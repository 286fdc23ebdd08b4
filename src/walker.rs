use std::path::{Path, PathBuf};

use crate::error::Result;

/// A file found while walking a directory.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Path relative to the walked root directory.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
    /// File size in bytes.
    pub size: u64,
}

/// Extensions accepted when walking directories.
pub const SUPPORTED_EXTENSIONS: &[&str] =
    &["txt", "md", "html", "htm", "xml", "json", "pdf", "docx"];

/// Recursively walk a directory and discover files that can be added.
///
/// Skips hidden files and directories (names starting with `.`), editor
/// temp files (`*.tmp`), Office lock files (`~$*`) and files whose extension
/// is not in [`SUPPORTED_EXTENSIONS`].
pub fn discover_files(root: &Path) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        if is_ignored_name(&name) {
            continue;
        }

        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &entry.path(), results)?;
        } else if file_type.is_symlink() {
            let Ok(resolved) = entry.path().canonicalize() else {
                continue; // broken symlink
            };
            // directory links back into the tree would loop
            if resolved.starts_with(root) && resolved.is_dir() {
                continue;
            }
            if resolved.is_file() && is_supported(&resolved) {
                results.push(make_discovered(root, &entry.path(), &resolved)?);
            }
        } else if file_type.is_file() && is_supported(&entry.path()) {
            let abs = entry.path().canonicalize()?;
            results.push(make_discovered(root, &entry.path(), &abs)?);
        }
    }

    Ok(())
}

fn is_ignored_name(name: &str) -> bool {
    name.starts_with('.') || name.starts_with("~$") || name.ends_with(".tmp")
}

/// Whether `path` has one of the [`SUPPORTED_EXTENSIONS`] (any case).
pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|s| s.eq_ignore_ascii_case(ext))
        })
}

fn make_discovered(
    root: &Path,
    original_path: &Path,
    absolute_path: &Path,
) -> Result<DiscoveredFile> {
    let relative_path = original_path
        .strip_prefix(root)
        .unwrap_or(original_path)
        .to_path_buf();
    let size = std::fs::metadata(absolute_path)?.len();

    Ok(DiscoveredFile {
        relative_path,
        absolute_path: absolute_path.to_path_buf(),
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(files: &[DiscoveredFile]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.relative_path.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn discovers_supported_types() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["note.md", "readme.txt", "page.html", "data.json", "feed.xml"] {
            std::fs::write(tmp.path().join(name), "content").unwrap();
        }
        std::fs::write(tmp.path().join("image.png"), "binary").unwrap();

        let files = discover_files(tmp.path()).unwrap();
        assert_eq!(
            names(&files),
            vec!["data.json", "feed.xml", "note.md", "page.html", "readme.txt"]
        );
    }

    #[test]
    fn extension_match_ignores_case() {
        assert!(is_supported(Path::new("REPORT.PDF")));
        assert!(is_supported(Path::new("notes.Md")));
        assert!(!is_supported(Path::new("archive.zip")));
        assert!(!is_supported(Path::new("Makefile")));
    }

    #[test]
    fn skips_hidden_temp_and_lock_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(".hidden.md"), "secret").unwrap();
        std::fs::write(tmp.path().join("~$report.docx"), "lock").unwrap();
        std::fs::write(tmp.path().join("draft.txt.tmp"), "partial").unwrap();
        std::fs::write(tmp.path().join("visible.md"), "hello").unwrap();

        let files = discover_files(tmp.path()).unwrap();
        assert_eq!(names(&files), vec!["visible.md"]);
    }

    #[test]
    fn skips_hidden_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let hidden = tmp.path().join(".git");
        std::fs::create_dir(&hidden).unwrap();
        std::fs::write(hidden.join("config.md"), "git config").unwrap();
        std::fs::write(tmp.path().join("notes.md"), "notes").unwrap();

        let files = discover_files(tmp.path()).unwrap();
        assert_eq!(names(&files), vec!["notes.md"]);
    }

    #[test]
    fn recurses_subdirectories() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("subdir");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("deep.md"), "deep").unwrap();
        std::fs::write(tmp.path().join("top.md"), "top").unwrap();

        let files = discover_files(tmp.path()).unwrap();
        assert_eq!(names(&files), vec!["subdir/deep.md", "top.md"]);
    }

    #[test]
    fn records_file_size() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("file.md"), "content").unwrap();

        let files = discover_files(tmp.path()).unwrap();
        assert_eq!(files[0].size, 7);
        assert!(files[0].absolute_path.is_absolute());
    }

    #[test]
    fn empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(discover_files(tmp.path()).unwrap().is_empty());
    }
}
