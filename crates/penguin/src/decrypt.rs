//! Widevine hand-off: the engine never derives keys; it gives the raw key
//! and the concatenated track file to the external decryption tool.

use std::path::Path;
use std::process::Stdio;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::PenguinError;
use crate::ffmpeg::tokio_command;
use crate::segment::{PoolFormat, SegmentPool};
use crate::state::StatePaths;

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Decrypt every non-subtitle pool's concatenated track in place.
pub async fn run_decrypt(
    binary: &str,
    raw_key: &[u8],
    pools: &[SegmentPool],
    paths: &StatePaths,
    token: &CancellationToken,
) -> Result<(), PenguinError> {
    let key_arg = format!("1:{}", hex_encode(raw_key));

    for pool in pools {
        if pool.format == PoolFormat::Subtitles {
            continue;
        }
        let Some(track) = pool.init_segment_path(&paths.temp_dir) else {
            continue;
        };
        let decrypted = track.with_extension("dec.mp4");

        info!(pool = %pool.id, track = %track.display(), "decrypting track");
        run_tool(binary, &key_arg, &track, &decrypted, token).await?;

        // Replace the encrypted input with the decrypted output.
        tokio::fs::remove_file(&track).await?;
        tokio::fs::rename(&decrypted, &track).await?;
    }
    Ok(())
}

async fn run_tool(
    binary: &str,
    key_arg: &str,
    input: &Path,
    output: &Path,
    token: &CancellationToken,
) -> Result<(), PenguinError> {
    let mut child = tokio_command(binary)
        .arg("--key")
        .arg(key_arg)
        .arg(input)
        .arg(output)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = token.cancelled() => {
            child.kill().await.ok();
            return Err(PenguinError::Cancelled);
        }
    };

    if status.success() {
        Ok(())
    } else {
        Err(PenguinError::DecryptFailed {
            status: status.to_string(),
        })
    }
}
