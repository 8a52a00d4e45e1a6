//! Supported input container detection.

use std::path::Path;

/// Extensions accepted when no override is configured.
pub const DEFAULT_VIDEO_EXTENSIONS: [&str; 6] = ["mp4", "mkv", "avi", "mov", "ogv", "webm"];

/// Check whether `path` has one of the `extensions` (case-insensitive).
pub fn is_supported_video<S: AsRef<str>>(path: &Path, extensions: &[S]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    extensions
        .iter()
        .any(|candidate| candidate.as_ref().eq_ignore_ascii_case(ext))
}
