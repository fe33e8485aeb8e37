//! Daemon state and job submission for mergemux
//!
//! Validates merge and remux requests against the latest category snapshot,
//! hands accepted work to background tasks and rescans the category once
//! the work is done.

use crate::batch::run_batch;
use crate::concurrency::derive_plan;
use crate::config::Config;
use crate::events::EventBus;
use crate::job_executor::{channel_token, JobExecutor, JobKind, MergeJob, RemuxJob};
use crate::qbit::{QbitClient, SourceError, TorrentSource};
use crate::server::{run_server, ServerError};
use crate::startup::run_startup_checks;
use crate::store::CategoryStore;
use crate::transform::ffmpeg::AudioTrack;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Upstream client could not be built
    #[error("Upstream client error: {0}")]
    Source(#[from] SourceError),

    /// HTTP server error
    #[error("Server error: {0}")]
    Server(#[from] ServerError),
}

/// Reasons a job submission is rejected. Nothing is spawned in these cases.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("Missing category or id")]
    MissingId,

    #[error("Invalid media id")]
    UnknownId,

    #[error("Media not available for merge")]
    NotMergeable,

    #[error("Media not available for remux")]
    NotRemuxable,
}

impl SubmitError {
    pub fn kind(&self) -> &'static str {
        match self {
            SubmitError::MissingId => "missing-id",
            SubmitError::UnknownId => "unknown-id",
            SubmitError::NotMergeable => "not-mergeable",
            SubmitError::NotRemuxable => "not-remuxable",
        }
    }
}

/// Handle returned for an accepted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTicket {
    pub job_id: String,
    pub channel: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemuxMode {
    #[default]
    Single,
    All,
}

/// Audio track selection for a single remux.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AudioTrackRequest {
    pub path: PathBuf,
    #[serde(default)]
    pub label: Option<String>,
}

/// A validated-shape remux request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemuxRequest {
    pub category: String,
    pub id: String,
    pub mode: RemuxMode,
    /// Batch concurrency hint; the configured default applies when absent.
    pub threads: Option<u32>,
    /// Replaces the matched audio list of a single remux when non-empty.
    pub audio_tracks: Vec<AudioTrackRequest>,
}

/// Daemon state shared by every request handler
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    store: Arc<CategoryStore>,
    executor: JobExecutor,
}

impl Daemon {
    /// Build the daemon with the qBittorrent client from `config`.
    pub fn new(config: Config) -> Result<Self, DaemonError> {
        let source = Arc::new(QbitClient::new(&config.qbit)?);
        Ok(Self::with_source(config, source))
    }

    /// Build the daemon over any torrent source.
    pub fn with_source(config: Config, source: Arc<dyn TorrentSource>) -> Self {
        let executor = JobExecutor::new(config.transform.ffmpeg_bin.clone(), EventBus::new());
        Self {
            config,
            store: Arc::new(CategoryStore::new(source)),
            executor,
        }
    }

    pub fn store(&self) -> &CategoryStore {
        &self.store
    }

    pub fn bus(&self) -> &EventBus {
        self.executor.bus()
    }

    /// Validate and start a merge of group `id` in `category`.
    pub fn submit_merge(&self, category: &str, id: &str) -> Result<JobTicket, SubmitError> {
        if category.is_empty() || id.is_empty() {
            warn!(id = %id, category = %category, "Merge requested without category or id");
            return Err(SubmitError::MissingId);
        }
        let group = self.store.merge_group(category, id).ok_or_else(|| {
            warn!(id = %id, "Merge requested with invalid media id");
            SubmitError::UnknownId
        })?;
        let directory = match group.output_dir() {
            Some(dir) if group.available && group.mergeable => dir,
            _ => {
                warn!(id = %id, "Merge requested for unavailable media");
                return Err(SubmitError::NotMergeable);
            }
        };

        let channel = channel_token(JobKind::Merge, id);
        let job = MergeJob {
            name: group.name.clone(),
            directory,
            video_files: group.video_files.clone(),
        };
        info!(media = %group.name, dir = %id, "Starting merge job");

        let executor = self.executor.clone();
        let store = self.store.clone();
        let category = category.to_string();
        let task_channel = channel.clone();
        tokio::spawn(async move {
            if let Err(e) = executor.run_merge(&task_channel, &job).await {
                error!(error = %e, "Merge job aborted");
            }
            refresh(&store, &category).await;
        });

        Ok(JobTicket {
            job_id: id.to_string(),
            channel,
        })
    }

    /// Validate and start a single or batch remux.
    pub fn submit_remux(&self, request: RemuxRequest) -> Result<JobTicket, SubmitError> {
        let RemuxRequest {
            category,
            id,
            mode,
            threads,
            audio_tracks,
        } = request;
        if category.is_empty() || id.is_empty() {
            warn!(id = %id, category = %category, "Remux requested without category or id");
            return Err(SubmitError::MissingId);
        }
        let snapshot = self.store.snapshot(&category).ok_or_else(|| {
            warn!(id = %id, "Remux requested with invalid media id");
            SubmitError::UnknownId
        })?;

        if mode == RemuxMode::All {
            if let Some(group) = snapshot.remux_group(&id) {
                let jobs: Vec<RemuxJob> = group
                    .remuxable_items()
                    .map(|item| RemuxJob {
                        name: item.name.clone(),
                        video_file: item.video_file.clone(),
                        audio_tracks: item
                            .audio_files
                            .iter()
                            .cloned()
                            .map(AudioTrack::unlabeled)
                            .collect(),
                    })
                    .collect();
                if !group.available || jobs.is_empty() {
                    warn!(id = %id, "Batch remux requested for unavailable media");
                    return Err(SubmitError::NotRemuxable);
                }
                info!(media = %group.name, dir = %id, "Starting batch remux job");
                return Ok(self.spawn_batch(category, id, threads, jobs));
            }
        }

        let (_, item) = snapshot.remux_item(&id).ok_or_else(|| {
            warn!(id = %id, "Remux requested with invalid media id");
            SubmitError::UnknownId
        })?;
        if !item.available || !item.remuxable {
            warn!(id = %id, "Remux requested for unavailable media");
            return Err(SubmitError::NotRemuxable);
        }

        let tracks = if audio_tracks.is_empty() {
            item.audio_files
                .iter()
                .cloned()
                .map(AudioTrack::unlabeled)
                .collect()
        } else {
            let mut tracks = Vec::with_capacity(audio_tracks.len());
            for requested in audio_tracks {
                if !item.audio_files.contains(&requested.path) {
                    warn!(id = %id, track = %requested.path.display(), "Remux requested with unmatched audio track");
                    return Err(SubmitError::NotRemuxable);
                }
                tracks.push(AudioTrack {
                    path: requested.path,
                    label: requested.label,
                });
            }
            tracks
        };

        let channel = channel_token(JobKind::Remux, &id);
        let job = RemuxJob {
            name: item.name.clone(),
            video_file: item.video_file.clone(),
            audio_tracks: tracks,
        };
        info!(media = %item.name, dir = %id, "Starting remux job");

        let executor = self.executor.clone();
        let store = self.store.clone();
        let task_channel = channel.clone();
        tokio::spawn(async move {
            if let Err(e) = executor.run_remux(&task_channel, &job).await {
                error!(error = %e, "Remux job aborted");
            }
            refresh(&store, &category).await;
        });

        Ok(JobTicket { job_id: id, channel })
    }

    fn spawn_batch(
        &self,
        category: String,
        id: String,
        threads: Option<u32>,
        jobs: Vec<RemuxJob>,
    ) -> JobTicket {
        let channel = channel_token(JobKind::RemuxGroup, &id);
        let plan = derive_plan(&self.config, threads, jobs.len());
        let executor = self.executor.clone();
        let store = self.store.clone();
        let task_channel = channel.clone();

        tokio::spawn(async move {
            run_batch(
                executor.bus(),
                &task_channel,
                plan,
                jobs,
                |job| job.name.clone(),
                |job| {
                    let executor = executor.clone();
                    let channel = task_channel.clone();
                    async move {
                        matches!(executor.run_remux(&channel, &job).await, Ok(report) if report.success())
                    }
                },
            )
            .await;
            refresh(&store, &category).await;
        });

        JobTicket { job_id: id, channel }
    }

    /// Probe ffmpeg, then serve HTTP until the server stops.
    pub async fn run_with_server(self: Arc<Self>) -> Result<(), DaemonError> {
        run_startup_checks(&self.config).await;
        run_server(self).await?;
        Ok(())
    }
}

async fn refresh(store: &CategoryStore, category: &str) {
    if let Err(e) = store.scan(category).await {
        warn!(category = %category, error = %e, "Refresh after job failed");
    }
}
