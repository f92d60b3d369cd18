//! Locating the finished file in staging and moving it into the output directory.

use std::io;
use std::path::{Path, PathBuf};

/// Extensions accepted when the tool did not report its output path.
const MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "webm", "mov", "m4v", "mp3", "flac", "m4a", "opus", "ogg", "wav", "aac",
];

const SCAN_DEPTH: usize = 3;

/// Finds the produced file: the reported path if it is inside staging, then the
/// last seen filename, then the first media file in staging.
pub(super) async fn locate_output(
    staging: &Path,
    reported: Option<&Path>,
    filename: Option<&str>,
) -> Option<PathBuf> {
    if let Some(path) = reported {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            staging.join(path)
        };
        if path.starts_with(staging) && is_file(&path).await {
            return Some(path);
        }
    }
    if let Some(name) = filename {
        let path = staging.join(name);
        if is_file(&path).await {
            return Some(path);
        }
    }
    scan_for_media(staging).await
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

async fn scan_for_media(root: &Path) -> Option<PathBuf> {
    let mut stack = vec![(root.to_path_buf(), 0usize)];
    let mut found: Vec<PathBuf> = Vec::new();
    while let Some((dir, depth)) = stack.pop() {
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(ft) = entry.file_type().await else {
                continue;
            };
            let path = entry.path();
            if ft.is_dir() && depth + 1 < SCAN_DEPTH {
                stack.push((path, depth + 1));
            } else if ft.is_file() && has_media_extension(&path) {
                found.push(path);
            }
        }
    }
    found.sort();
    found.into_iter().next()
}

fn has_media_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| MEDIA_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Moves `src` to `dest`. Fails with `AlreadyExists` if `dest` exists and
/// `overwrite` is off. Falls back to copy + remove across filesystems.
pub(super) async fn move_into_place(src: &Path, dest: &Path, overwrite: bool) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::symlink_metadata(dest).await.is_ok() {
        if !overwrite {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", dest.display()),
            ));
        }
        tokio::fs::remove_file(dest).await?;
    }
    match tokio::fs::rename(src, dest).await {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::debug!(src = %src.display(), dest = %dest.display(), "rename failed, copying: {e}");
            tokio::fs::copy(src, dest).await?;
            let _ = tokio::fs::remove_file(src).await;
            Ok(())
        }
    }
}

/// Removes a job's staging directory; failures only log.
pub(super) async fn remove_staging(staging: &Path) {
    match tokio::fs::remove_dir_all(staging).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %staging.display(), "staging cleanup failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn locate_prefers_reported_then_filename_then_scan() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path();
        std::fs::write(staging.join("a.mkv"), b"a").unwrap();
        std::fs::create_dir(staging.join("sub")).unwrap();
        std::fs::write(staging.join("sub").join("b.mp3"), b"b").unwrap();
        std::fs::write(staging.join("c.part"), b"c").unwrap();

        let reported = staging.join("sub").join("b.mp3");
        assert_eq!(
            locate_output(staging, Some(&reported), None).await,
            Some(reported.clone())
        );
        // Reported paths outside staging are ignored.
        assert_eq!(
            locate_output(staging, Some(Path::new("/etc/passwd")), Some("a.mkv")).await,
            Some(staging.join("a.mkv"))
        );
        assert_eq!(
            locate_output(staging, None, None).await,
            Some(staging.join("a.mkv"))
        );
    }

    #[tokio::test]
    async fn locate_finds_nothing_without_media() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.part"), b"x").unwrap();
        assert_eq!(locate_output(dir.path(), None, None).await, None);
    }

    #[tokio::test]
    async fn move_refuses_existing_unless_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.mp4");
        let dest = dir.path().join("out").join("clip.mp4");
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(&dest, b"old").unwrap();
        std::fs::write(&src, b"new").unwrap();

        let err = move_into_place(&src, &dest, false).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert!(src.exists());

        move_into_place(&src, &dest, true).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"new");
        assert!(!src.exists());
    }
}
