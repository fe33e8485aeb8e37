//! ffmpeg invocation builders for merge and remux jobs.
//!
//! Both jobs are pure stream copies: merge concatenates parts through the
//! concat demuxer, remux adds external audio tracks to a video container.

use crate::classify::remux_output_preview;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::process::Command;

/// One external audio input of a remux job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrack {
    pub path: PathBuf,
    /// Stream title written into the output, if any.
    pub label: Option<String>,
}

impl AudioTrack {
    pub fn unlabeled(path: PathBuf) -> Self {
        Self { path, label: None }
    }
}

/// Quote a path for the concat demuxer. Single quotes inside the path close
/// the quoted string, emit an escaped quote and reopen it.
pub fn quote_concat_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    format!("'{}'", raw.replace('\'', "'\\''"))
}

/// Contents of a concat manifest listing `inputs` in order.
pub fn concat_manifest(inputs: &[PathBuf]) -> String {
    let mut manifest = inputs
        .iter()
        .map(|path| format!("file {}", quote_concat_path(path)))
        .collect::<Vec<_>>()
        .join("\n");
    manifest.push('\n');
    manifest
}

/// Build the concat/stream-copy command for a merge job.
pub fn build_merge_command(ffmpeg_bin: &Path, manifest: &Path, output: &Path) -> Command {
    let mut cmd = Command::new(ffmpeg_bin);
    cmd.arg("-hide_banner");
    cmd.arg("-f").arg("concat");
    cmd.arg("-safe").arg("0");
    cmd.arg("-i").arg(manifest);
    cmd.arg("-c").arg("copy");
    cmd.arg(output);
    cmd
}

/// Build the multi-input stream-mapped command for a remux job.
///
/// The first video stream of the source comes first, then the first audio
/// stream of each external track in order, then whatever audio the source
/// already carries. `-y` is required because the output path is reserved
/// on disk before launch.
pub fn build_remux_command(
    ffmpeg_bin: &Path,
    video: &Path,
    tracks: &[AudioTrack],
    output: &Path,
) -> Command {
    let mut cmd = Command::new(ffmpeg_bin);
    cmd.arg("-hide_banner");
    cmd.arg("-y");
    cmd.arg("-i").arg(video);
    for track in tracks {
        cmd.arg("-i").arg(&track.path);
    }

    cmd.arg("-map").arg("0:v:0");
    for (index, track) in tracks.iter().enumerate() {
        cmd.arg("-map").arg(format!("{}:a:0", index + 1));
        if let Some(label) = track.label.as_deref().filter(|l| !l.is_empty()) {
            cmd.arg(format!("-metadata:s:a:{}", index))
                .arg(format!("title={}", label));
        }
    }
    cmd.arg("-map").arg("0:a?");

    cmd.arg("-c").arg("copy");
    cmd.arg(output);
    cmd
}

/// Pick and reserve a free output path for remuxing `video`.
///
/// Starts from [`remux_output_preview`] and appends `-1`, `-2`, ... to the
/// stem until a path can be created exclusively. The empty placeholder left
/// behind is overwritten by ffmpeg, so two jobs never share an output.
pub async fn reserve_remux_output(video: &Path) -> io::Result<PathBuf> {
    let preferred = remux_output_preview(video);
    let dir = preferred
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let stem = preferred
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut candidate = preferred;
    let mut counter = 0u32;
    loop {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                counter += 1;
                candidate = dir.join(format!("{}-{}.mkv", stem, counter));
            }
            Err(e) => return Err(e),
        }
    }
}

/// Remove `path` if it exists.
pub async fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
