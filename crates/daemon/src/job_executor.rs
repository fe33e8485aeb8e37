//! Job runner for merge and remux jobs.
//!
//! A job is one ffmpeg invocation. Its output is published on the event bus
//! under the job's channel token line by line while the process runs, then
//! a single terminal status line is published. Failures never escape as
//! panics; they end up in the log stream like any other outcome.

use crate::events::EventBus;
use crate::transform::ffmpeg::{
    build_merge_command, build_remux_command, concat_manifest, remove_if_exists,
    reserve_remux_output, AudioTrack,
};
use crate::transform::process::{spawn_streaming, ExitKind, ProcessEvent};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Error type for job preparation. Raised before ffmpeg is launched.
#[derive(Debug, Error)]
pub enum JobError {
    /// Removing a previous merge output failed
    #[error("Failed to remove existing output {path}: {source}")]
    RemoveOutput {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Writing the concat manifest failed
    #[error("Failed to write concat list {path}: {source}")]
    Manifest {
        path: PathBuf,
        source: std::io::Error,
    },

    /// No free remux output path could be reserved
    #[error("Failed to reserve output next to {video}: {source}")]
    ReserveOutput {
        video: PathBuf,
        source: std::io::Error,
    },
}

/// Kind of job a channel token refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Merge,
    Remux,
    RemuxGroup,
}

impl JobKind {
    fn prefix(self) -> &'static str {
        match self {
            JobKind::Merge => "",
            JobKind::Remux => "remux:",
            JobKind::RemuxGroup => "remux-group:",
        }
    }
}

/// Deterministic channel token for a job on `subject_id`.
///
/// Base64 keeps the token free of characters that matter to event framing.
pub fn channel_token(kind: JobKind, subject_id: &str) -> String {
    STANDARD.encode(format!("{}{}", kind.prefix(), subject_id))
}

/// Inputs of a merge job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeJob {
    pub name: String,
    pub directory: PathBuf,
    /// At least two parts, in concatenation order.
    pub video_files: Vec<PathBuf>,
}

impl MergeJob {
    pub fn output_path(&self) -> PathBuf {
        self.directory.join(format!("{}.mp4", self.name))
    }
}

/// Inputs of a remux job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemuxJob {
    pub name: String,
    pub video_file: PathBuf,
    pub audio_tracks: Vec<AudioTrack>,
}

/// Terminal result of a job that got as far as launching ffmpeg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub output: PathBuf,
    pub exit: ExitKind,
}

impl JobReport {
    pub fn success(&self) -> bool {
        self.exit.success()
    }
}

fn status_line(done: &str, exit: &ExitKind) -> String {
    match exit {
        ExitKind::Code(0) => format!("\n{}\n", done),
        ExitKind::Code(code) => format!("\nffmpeg exited with code {}\n", code),
        ExitKind::Signal => "\nffmpeg was terminated by a signal\n".to_string(),
        ExitKind::SpawnFailed(reason) => format!("\nFailed to start ffmpeg: {}\n", reason),
        ExitKind::WaitFailed(reason) => format!("\nLost track of ffmpeg: {}\n", reason),
    }
}

/// Runs ffmpeg jobs and reports their progress on the event bus.
#[derive(Clone)]
pub struct JobExecutor {
    ffmpeg_bin: PathBuf,
    bus: EventBus,
}

impl JobExecutor {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>, bus: EventBus) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            bus,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn ffmpeg_bin(&self) -> &Path {
        &self.ffmpeg_bin
    }

    /// Concatenate the parts of `job` into `{name}.mp4`.
    ///
    /// An existing output is removed first. The concat list lives next to
    /// the output for the duration of the run and is deleted afterwards.
    pub async fn run_merge(&self, channel: &str, job: &MergeJob) -> Result<JobReport, JobError> {
        let output = job.output_path();
        info!(
            name = %job.name,
            parts = job.video_files.len(),
            output = %output.display(),
            "Preparing merge"
        );

        let prepared = self.prepare_merge(job, &output).await;
        let manifest = match prepared {
            Ok(manifest) => manifest,
            Err(e) => {
                self.report_failure(channel, &e);
                return Err(e);
            }
        };

        let cmd = build_merge_command(&self.ffmpeg_bin, &manifest, &output);
        let exit = self.stream(channel, cmd).await;
        self.bus
            .publish_log(channel, status_line("Merge completed", &exit));
        log_exit("merge", &output, &exit);

        if let Err(e) = remove_if_exists(&manifest).await {
            warn!(path = %manifest.display(), error = %e, "Failed to remove concat list");
        }

        Ok(JobReport { output, exit })
    }

    /// ffmpeg refuses to overwrite without `-y`, so the previous output goes
    /// first.
    async fn prepare_merge(&self, job: &MergeJob, output: &Path) -> Result<PathBuf, JobError> {
        remove_if_exists(output)
            .await
            .map_err(|source| JobError::RemoveOutput {
                path: output.to_path_buf(),
                source,
            })?;

        let manifest = job
            .directory
            .join(format!("concat-list-{}.txt", Uuid::new_v4()));
        tokio::fs::write(&manifest, concat_manifest(&job.video_files))
            .await
            .map_err(|source| JobError::Manifest {
                path: manifest.clone(),
                source,
            })?;
        Ok(manifest)
    }

    /// Remux `job` into a freshly reserved output path.
    pub async fn run_remux(&self, channel: &str, job: &RemuxJob) -> Result<JobReport, JobError> {
        let output = match reserve_remux_output(&job.video_file).await {
            Ok(path) => path,
            Err(source) => {
                let e = JobError::ReserveOutput {
                    video: job.video_file.clone(),
                    source,
                };
                self.report_failure(channel, &e);
                return Err(e);
            }
        };
        info!(
            name = %job.name,
            tracks = job.audio_tracks.len(),
            output = %output.display(),
            "Preparing remux"
        );

        let cmd = build_remux_command(&self.ffmpeg_bin, &job.video_file, &job.audio_tracks, &output);
        let exit = self.stream(channel, cmd).await;
        self.bus
            .publish_log(channel, status_line("Remux completed", &exit));
        log_exit("remux", &output, &exit);

        // Release the reservation if ffmpeg never got to write it.
        if matches!(exit, ExitKind::SpawnFailed(_)) {
            if let Err(e) = remove_if_exists(&output).await {
                warn!(path = %output.display(), error = %e, "Failed to remove reserved output");
            }
        }

        Ok(JobReport { output, exit })
    }

    async fn stream(&self, channel: &str, cmd: Command) -> ExitKind {
        let mut events = spawn_streaming(cmd);
        while let Some(event) = events.recv().await {
            match event {
                ProcessEvent::Output(line) => {
                    self.bus.publish_log(channel, format!("{}\n", line));
                }
                ProcessEvent::Exited(exit) => return exit,
            }
        }
        ExitKind::WaitFailed("process supervisor stopped".to_string())
    }

    fn report_failure(&self, channel: &str, e: &JobError) {
        error!(error = %e, "Job could not be started");
        self.bus.publish_log(channel, format!("\n{}\n", e));
    }
}

fn log_exit(kind: &str, output: &Path, exit: &ExitKind) {
    if exit.success() {
        info!(job = kind, output = %output.display(), "ffmpeg finished");
    } else {
        error!(job = kind, output = %output.display(), exit = ?exit, "ffmpeg failed");
    }
}
