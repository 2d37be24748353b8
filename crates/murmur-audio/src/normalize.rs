//! Audio normalization to the canonical PCM WAV format.

use std::path::Path;

use tokio::process::Command;
use tracing::debug;

use murmur_core::defaults::NORMALIZED_SAMPLE_RATE;
use murmur_core::Result;

use crate::ffmpeg_bin;
use crate::process::ToolProcess;

/// Launch ffmpeg to resample the source to single-channel 16 kHz 16-bit
/// PCM WAV, overwriting the output. The returned process has not been
/// waited on; the caller registers its kill handle before waiting so a
/// cancel can terminate the conversion.
pub fn spawn_normalize(input: &Path, output: &Path) -> Result<ToolProcess> {
    debug!(
        input = %input.display(),
        output = %output.display(),
        "Spawning ffmpeg normalize"
    );

    let mut cmd = Command::new(ffmpeg_bin());
    cmd.arg("-y")
        .arg("-i")
        .arg(input)
        .args(["-ar", &NORMALIZED_SAMPLE_RATE.to_string()])
        .args(["-ac", "1"])
        .args(["-c:a", "pcm_s16le"])
        .arg(output);

    ToolProcess::spawn(cmd, "ffmpeg")
}

/// Remove an audio file; absence is not an error.
pub async fn delete_audio(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
