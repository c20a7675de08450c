//! Source recording discovery.
//!
//! Only the top level of the media directory is scanned. A file is a source
//! recording when its extension is `input_extension` (ASCII
//! case-insensitive). Names need not be valid UTF-8.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{NormalizeError, Result};

/// Lists source recordings directly inside `dir`, sorted by file name.
///
/// An entry that cannot be read fails the whole listing rather than being
/// left out of the batch.
pub fn find_sources(dir: &Path, input_extension: &str) -> Result<Vec<PathBuf>> {
    let unavailable = |source: std::io::Error| NormalizeError::DirectoryUnavailable {
        path: dir.to_path_buf(),
        source,
    };

    let mut sources = Vec::new();
    for entry in fs::read_dir(dir).map_err(unavailable)? {
        let path = entry.map_err(unavailable)?.path();
        if path.is_file() && has_extension(&path, input_extension) {
            sources.push(path);
        }
    }
    sources.sort();
    Ok(sources)
}

/// `public/data/clip.mov` -> `public/data/clip.mp4`.
///
/// Only the trailing extension is replaced. Returns `None` when `source`
/// does not carry `input_extension`, or when the result would name the
/// source itself.
pub fn output_path_for(
    source: &Path,
    input_extension: &str,
    output_extension: &str,
) -> Option<PathBuf> {
    if !has_extension(source, input_extension)
        || input_extension.eq_ignore_ascii_case(output_extension)
    {
        return None;
    }
    Some(source.with_extension(output_extension))
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(OsStr::new(extension)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn output_path_replaces_only_the_extension() {
        assert_eq!(
            output_path_for(Path::new("public/data/clip.mov"), "mov", "mp4"),
            Some(PathBuf::from("public/data/clip.mp4"))
        );
        assert_eq!(
            output_path_for(Path::new("data/my.mov.clip.mov"), "mov", "mp4"),
            Some(PathBuf::from("data/my.mov.clip.mp4"))
        );
        assert_eq!(
            output_path_for(Path::new("1723707479.70642.MOV"), "mov", "mp4"),
            Some(PathBuf::from("1723707479.70642.mp4"))
        );
    }

    #[test]
    fn output_path_rejects_other_extensions() {
        assert_eq!(output_path_for(Path::new("clip.mp4"), "mov", "mp4"), None);
        assert_eq!(output_path_for(Path::new("clipmov"), "mov", "mp4"), None);
        assert_eq!(output_path_for(Path::new(".mov"), "mov", "mp4"), None);
    }

    #[test]
    fn output_path_never_names_the_source() {
        let source = Path::new("public/data/clip.mov");
        assert_eq!(output_path_for(source, "mov", "mov"), None);
        assert_eq!(output_path_for(Path::new("clip.MOV"), "mov", "mov"), None);
        assert_eq!(output_path_for(source, "mov", "MOV"), None);
    }

    #[test]
    fn finds_only_top_level_matching_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.mov"), b"x").unwrap();
        fs::write(dir.path().join("a.MOV"), b"x").unwrap();
        fs::write(dir.path().join("a.json"), b"{}").unwrap();
        fs::write(dir.path().join("c.mp4"), b"x").unwrap();
        fs::create_dir(dir.path().join("nested.mov")).unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("d.mov"), b"x").unwrap();

        let found = find_sources(dir.path(), "mov").unwrap();
        assert_eq!(
            found,
            vec![dir.path().join("a.MOV"), dir.path().join("b.mov")]
        );
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_names_are_still_sources() {
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        let source = dir.path().join(OsStr::from_bytes(b"take\xff1.mov"));
        fs::write(&source, b"x").unwrap();

        let found = find_sources(dir.path(), "mov").unwrap();
        assert_eq!(found, vec![source.clone()]);
        assert_eq!(
            output_path_for(&source, "mov", "mp4"),
            Some(dir.path().join(OsStr::from_bytes(b"take\xff1.mp4")))
        );
    }

    #[test]
    fn missing_directory_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let err = find_sources(&dir.path().join("nope"), "mov").unwrap_err();
        assert!(matches!(err, NormalizeError::DirectoryUnavailable { .. }));
    }
}
