//! Transcoder resolution and argument templates.

use super::{OutputTarget, StartError};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Playlist file name inside the segmented output directory.
pub const PLAYLIST_NAME: &str = "playlist.m3u8";

/// Resolve the transcoder executable.
///
/// A name containing a path separator is used as-is. A bare name is searched
/// in `search_path` (a `PATH`-style list). Missing or non-executable files
/// yield [`StartError::ToolNotFound`].
pub fn resolve_tool(tool: &str, search_path: Option<&OsStr>) -> Result<PathBuf, StartError> {
    if tool.contains('/') || tool.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(tool);
        return if is_executable(&path) {
            Ok(path)
        } else {
            Err(StartError::ToolNotFound(tool.to_string()))
        };
    }

    if let Some(search_path) = search_path {
        for dir in std::env::split_paths(search_path) {
            let candidate = dir.join(tool);
            if is_executable(&candidate) {
                return Ok(candidate);
            }
        }
    }

    Err(StartError::ToolNotFound(tool.to_string()))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Build the transcoder argument list for `target`.
pub fn build_args(user_agent: &str, source_url: &str, target: &OutputTarget) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "warning", "-nostdin", "-y"]
        .iter()
        .map(|s| (*s).to_string())
        .collect();

    args.extend([
        "-user_agent".to_string(),
        user_agent.to_string(),
        "-i".to_string(),
        source_url.to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
    ]);

    match target {
        OutputTarget::Segmented {
            dir,
            segment_seconds,
            list_size,
        } => {
            args.extend([
                "-f".to_string(),
                "hls".to_string(),
                "-hls_time".to_string(),
                segment_seconds.to_string(),
                "-hls_list_size".to_string(),
                list_size.to_string(),
                "-hls_flags".to_string(),
                "delete_segments+append_list".to_string(),
                "-hls_allow_cache".to_string(),
                "0".to_string(),
                dir.join(PLAYLIST_NAME).to_string_lossy().into_owned(),
            ]);
        }
        OutputTarget::Continuous => {
            args.extend(["-f".to_string(), "mpegts".to_string(), "pipe:1".to_string()]);
        }
    }

    args
}
