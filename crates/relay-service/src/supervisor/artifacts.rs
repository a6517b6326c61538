//! Segmented output housekeeping.

use std::path::Path;
use tracing::debug;

/// Extensions written by the HLS muxer.
const ARTIFACT_EXTENSIONS: [&str; 2] = ["ts", "m3u8"];

/// Remove stale playlists and segments from `dir`, creating it if missing.
///
/// Returns the number of files removed. Other files are left alone.
pub async fn purge(dir: &Path) -> std::io::Result<usize> {
    tokio::fs::create_dir_all(dir).await?;

    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_artifact = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ARTIFACT_EXTENSIONS.contains(&ext));

        if is_artifact && entry.file_type().await?.is_file() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                // Raced with the previous muxer's delete_segments
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
    }

    debug!(target: "relay.supervisor", dir = %dir.display(), removed, "Purged stale output");
    Ok(removed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_purge_removes_only_hls_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["playlist.m3u8", "playlist0.ts", "playlist1.ts", "keep.txt", "poster.jpg"] {
            tokio::fs::write(dir.path().join(name), b"x").await.unwrap();
        }
        tokio::fs::create_dir(dir.path().join("nested.ts")).await.unwrap();

        let removed = purge(dir.path()).await.unwrap();
        assert_eq!(removed, 3);

        assert!(!dir.path().join("playlist.m3u8").exists());
        assert!(!dir.path().join("playlist0.ts").exists());
        assert!(dir.path().join("keep.txt").exists());
        assert!(dir.path().join("poster.jpg").exists());
        assert!(dir.path().join("nested.ts").is_dir());
    }

    #[tokio::test]
    async fn test_purge_creates_missing_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("stream");

        assert_eq!(purge(&dir).await.unwrap(), 0);
        assert!(dir.is_dir());
    }
}
