//! Classifier module for turning resolved torrent listings into media groups.
//!
//! Two independent, pure derivations run over the same [`ResolvedListing`]:
//! a merge view (multi-part video sets eligible for concatenation) and a
//! remux view (videos paired with matching external audio tracks).

use crate::resolve::{base_name, ResolvedListing, TorrentFile, TorrentInfo};
use serde::Serialize;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// Video file extensions (case-insensitive matching).
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "m4v"];

/// External audio track extensions (case-insensitive matching).
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mka", "aac", "ac3", "eac3", "dts", "flac", "mp3", "ogg", "opus", "wav", "m4a",
];

pub const WARN_NO_FILES: &str = "qBittorrent returned no files";
pub const WARN_NO_VIDEO_FILES: &str = "No video files found";
pub const WARN_SINGLE_FILE: &str = "Single-file torrent; merge not needed";
pub const WARN_NO_VIDEO_FILE: &str = "No video file found";
pub const WARN_NO_AUDIO: &str = "No matching external audio tracks found";

/// Multi-part video set considered for stream-copy concatenation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeGroup {
    pub id: String,
    pub name: String,
    pub video_files: Vec<PathBuf>,
    pub all_files: Vec<PathBuf>,
    pub available: bool,
    pub mergeable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    /// Set by the category store after classification; advisory only.
    pub output_exists: bool,
    #[serde(skip)]
    pub directory: Option<PathBuf>,
}

impl MergeGroup {
    /// Directory the merged file is written to.
    pub fn output_dir(&self) -> Option<PathBuf> {
        self.directory.clone().or_else(|| {
            self.video_files
                .first()
                .and_then(|p| p.parent())
                .map(Path::to_path_buf)
        })
    }

    /// `{name}.mp4` inside the output directory.
    pub fn output_path(&self) -> Option<PathBuf> {
        self.output_dir()
            .map(|dir| dir.join(format!("{}.mp4", self.name)))
    }
}

/// Torrent-level set of remux items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemuxGroup {
    pub id: String,
    pub name: String,
    pub path: String,
    pub items: Vec<RemuxItem>,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl RemuxGroup {
    /// Items that have at least one matched audio track.
    pub fn remuxable_items(&self) -> impl Iterator<Item = &RemuxItem> {
        self.items.iter().filter(|item| item.remuxable)
    }
}

/// One video file and the external audio tracks matched to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemuxItem {
    pub id: String,
    pub name: String,
    pub video_file: PathBuf,
    pub audio_files: Vec<PathBuf>,
    pub output_path: PathBuf,
    pub available: bool,
    pub remuxable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    /// Set by the category store after classification; advisory only.
    pub output_exists: bool,
}

/// Split a file name into stem and extension the way most media tools do:
/// a leading dot (hidden file) is part of the stem, not an extension marker.
pub fn split_extension(file_name: &str) -> (&str, Option<&str>) {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => (&file_name[..idx], Some(&file_name[idx + 1..])),
        _ => (file_name, None),
    }
}

fn has_extension(file_name: &str, extensions: &[&str]) -> bool {
    split_extension(base_name(file_name))
        .1
        .map(|ext| {
            let ext = ext.to_lowercase();
            extensions.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Checks if a file has a video extension (case-insensitive).
pub fn is_video_file(file_name: &str) -> bool {
    has_extension(file_name, VIDEO_EXTENSIONS)
}

/// Checks if a file has an external audio extension (case-insensitive).
pub fn is_audio_file(file_name: &str) -> bool {
    has_extension(file_name, AUDIO_EXTENSIONS)
}

/// Base name with the extension stripped, case-folded.
pub fn normalize_stem(file_name: &str) -> String {
    split_extension(base_name(file_name)).0.to_lowercase()
}

/// Whether an audio stem belongs to a video stem: it must start with the
/// video stem, and anything after it must begin at a non-alphanumeric
/// boundary (`ep1.eng` matches `ep1`, `ep10` doesn't).
pub fn stem_matches(audio_stem: &str, video_stem: &str) -> bool {
    match audio_stem.strip_prefix(video_stem) {
        Some(rest) => rest
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric()),
        None => false,
    }
}

/// Numeric-aware, case-insensitive comparison so that `part2` sorts before
/// `part10`. Ties under case folding fall back to a byte comparison so the
/// order is total and deterministic.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let ln = take_digits(&mut left);
                let rn = take_digits(&mut right);
                let ord = compare_digit_runs(&ln, &rn);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(l), Some(r)) => {
                let ord = l
                    .to_lowercase()
                    .cmp(r.to_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
        run.push(c);
        chars.next();
    }
    run
}

fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn sort_naturally(entries: &mut [&TorrentFile]) {
    entries.sort_by(|a, b| natural_cmp(&a.relative_name, &b.relative_name));
}

/// Preferred remux target for a video: `{stem}.remux.mkv` when the source is
/// already Matroska, `{stem}.mkv` otherwise.
pub fn remux_output_preview(video_file: &Path) -> PathBuf {
    let file_name = video_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (stem, ext) = split_extension(&file_name);
    let target = match ext {
        Some(ext) if ext.eq_ignore_ascii_case("mkv") => format!("{}.remux.mkv", stem),
        _ => format!("{}.mkv", stem),
    };
    video_file.with_file_name(target)
}

fn first_non_empty(candidates: &[&str]) -> String {
    candidates
        .iter()
        .find(|c| !c.is_empty())
        .map(|c| c.to_string())
        .unwrap_or_default()
}

fn path_string(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Merge derivation: sorted top-level videos of one torrent.
pub fn build_merge_group(torrent: &TorrentInfo, listing: &ResolvedListing) -> MergeGroup {
    let mut videos: Vec<&TorrentFile> = listing
        .top_level
        .iter()
        .filter(|entry| is_video_file(&entry.relative_name))
        .collect();
    sort_naturally(&mut videos);

    let mut all: Vec<&TorrentFile> = listing.top_level.iter().collect();
    sort_naturally(&mut all);

    let warning = if listing.is_empty() {
        Some(WARN_NO_FILES)
    } else {
        match videos.len() {
            0 => Some(WARN_NO_VIDEO_FILES),
            1 => Some(WARN_SINGLE_FILE),
            _ => None,
        }
    };

    let dir = path_string(&listing.logical_dir);
    MergeGroup {
        id: first_non_empty(&[&dir, &torrent.content_path, &torrent.save_path, &torrent.hash]),
        name: listing.name.clone(),
        video_files: videos.iter().map(|e| e.full_path.clone()).collect(),
        all_files: all.iter().map(|e| e.full_path.clone()).collect(),
        available: true,
        mergeable: videos.len() >= 2,
        warning: warning.map(str::to_string),
        output_exists: false,
        directory: listing.logical_dir.clone(),
    }
}

/// Remux derivation: every top-level video paired with the audio files
/// (anywhere in the torrent) whose stem extends the video's stem.
pub fn build_remux_group(torrent: &TorrentInfo, listing: &ResolvedListing) -> RemuxGroup {
    let mut videos: Vec<&TorrentFile> = listing
        .top_level
        .iter()
        .filter(|entry| is_video_file(&entry.relative_name))
        .collect();
    sort_naturally(&mut videos);

    let mut audio: Vec<&TorrentFile> = listing
        .all_entries
        .iter()
        .filter(|entry| is_audio_file(&entry.relative_name))
        .collect();
    sort_naturally(&mut audio);

    let dir = path_string(&listing.logical_dir);
    let id = first_non_empty(&[&torrent.hash, &dir, &torrent.content_path, &torrent.save_path]);
    let path = first_non_empty(&[&dir, &torrent.save_path]);

    let items: Vec<RemuxItem> = videos
        .iter()
        .map(|video| {
            let video_stem = normalize_stem(&video.relative_name);
            let audio_files: Vec<PathBuf> = audio
                .iter()
                .filter(|a| stem_matches(&normalize_stem(&a.relative_name), &video_stem))
                .map(|a| a.full_path.clone())
                .collect();
            let remuxable = !audio_files.is_empty();
            RemuxItem {
                id: video.full_path.to_string_lossy().into_owned(),
                name: video.file_name().to_string(),
                output_path: remux_output_preview(&video.full_path),
                video_file: video.full_path.clone(),
                audio_files,
                available: true,
                remuxable,
                warning: (!remuxable).then(|| WARN_NO_AUDIO.to_string()),
                output_exists: false,
            }
        })
        .collect();

    RemuxGroup {
        id,
        name: listing.name.clone(),
        path,
        warning: items.is_empty().then(|| WARN_NO_VIDEO_FILE.to_string()),
        items,
        available: true,
    }
}
