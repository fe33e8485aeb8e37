//! Everything that touches the transform binary: argument vectors, concat
//! manifests, output path reservation and supervised execution.

pub mod ffmpeg;
pub mod process;

pub use ffmpeg::{
    build_merge_command, build_remux_command, concat_manifest, quote_concat_path,
    reserve_remux_output, AudioTrack,
};
pub use process::{spawn_streaming, ExitKind, LineSplitter, ProcessEvent};
