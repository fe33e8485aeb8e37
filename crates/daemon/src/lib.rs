//! mergemux
//!
//! Classifies completed qBittorrent downloads into merge and remux groups
//! and runs ffmpeg stream-copy jobs for them, streaming progress over SSE.

pub mod batch;
pub mod classify;
pub mod concurrency;
pub mod daemon;
pub mod events;
pub mod job_executor;
pub mod qbit;
pub mod resolve;
pub mod server;
pub mod startup;
pub mod store;
pub mod transform;

pub use mergemux_config as config;
pub use mergemux_config::Config;
pub use batch::{run_batch, BatchSummary};
pub use classify::{build_merge_group, build_remux_group, MergeGroup, RemuxGroup, RemuxItem};
pub use concurrency::{derive_plan, BatchPlan};
pub use daemon::{Daemon, DaemonError, JobTicket, RemuxMode, RemuxRequest, SubmitError};
pub use events::{BusEvent, EventBus, LogEvent, Subscription};
pub use job_executor::{channel_token, JobError, JobExecutor, JobKind, JobReport, MergeJob, RemuxJob};
pub use qbit::{QbitClient, SourceError, TorrentSource};
pub use resolve::{resolve_listing, ResolvedListing, TorrentFile, TorrentInfo};
pub use server::{create_router, run_server, ServerError};
pub use startup::{check_ffmpeg_available, parse_ffmpeg_version, run_startup_checks, StartupError};
pub use store::{CategoryStore, Classification};
