//! Audio duration probing via ffprobe.

use std::path::Path;

use tokio::process::Command;
use tracing::debug;

use murmur_core::{Error, Result};

use crate::ffprobe_bin;

/// Measure the duration of an audio file in seconds.
///
/// Unparsable probe output is an error: downstream chunking decisions
/// depend on a real duration, so there is no safe default.
pub async fn probe_duration(path: &Path) -> Result<f64> {
    let output = Command::new(ffprobe_bin())
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await
        .map_err(|e| Error::Audio(format!("Failed to launch ffprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Audio(format!(
            "ffprobe exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let text = stdout.trim();
    let duration = text.parse::<f64>().map_err(|_| {
        Error::Audio(format!("ffprobe produced an unparsable duration: {text:?}"))
    })?;

    debug!(path = %path.display(), duration, "Probed audio duration");
    Ok(duration)
}
