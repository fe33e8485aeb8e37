//! Path and name resolution for torrent file listings.
//!
//! qBittorrent reports a torrent's files as a flat list of names relative to
//! the save path. Torrents with a single root folder prefix every name with
//! `"{torrent name}/"`; loose-file torrents don't. This module reconstructs
//! the logical directory of a torrent and splits its listing into top-level
//! entries (merge and remux video candidates) and all entries (audio pool).

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Torrent metadata as returned by the completed-torrent listing.
///
/// Every field tolerates being absent so that a partial upstream record
/// still produces a displayable classification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TorrentInfo {
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub save_path: String,
    #[serde(default)]
    pub content_path: String,
}

impl TorrentInfo {
    /// Display name: torrent name, then hash, then a generic fallback.
    pub fn display_name(&self) -> String {
        if !self.name.is_empty() {
            self.name.clone()
        } else if !self.hash.is_empty() {
            self.hash.clone()
        } else {
            "Torrent".to_string()
        }
    }
}

/// One member file of a torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFile {
    /// Name relative to the logical directory (root folder stripped).
    pub relative_name: String,
    /// Absolute path on disk.
    pub full_path: PathBuf,
}

impl TorrentFile {
    /// Final component of the relative name.
    pub fn file_name(&self) -> &str {
        base_name(&self.relative_name)
    }

    fn is_nested(&self) -> bool {
        self.relative_name.contains(['/', '\\'])
    }
}

/// Output of [`resolve_listing`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedListing {
    /// Display name of the torrent.
    pub name: String,
    /// Directory holding the torrent's content, when it can be derived.
    pub logical_dir: Option<PathBuf>,
    /// Entries directly inside the logical directory.
    pub top_level: Vec<TorrentFile>,
    /// Every entry, nested ones included.
    pub all_entries: Vec<TorrentFile>,
}

impl ResolvedListing {
    /// True when upstream reported no files at all.
    pub fn is_empty(&self) -> bool {
        self.all_entries.is_empty()
    }
}

/// Final path component of a name that may use either separator.
pub fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// Root folder shared by every file name, if the torrent has one.
pub fn detect_root_folder<'a>(torrent_name: &'a str, file_names: &[String]) -> Option<&'a str> {
    if torrent_name.is_empty() || file_names.is_empty() {
        return None;
    }
    let prefix = format!("{}/", torrent_name);
    let win_prefix = format!("{}\\", torrent_name);
    file_names
        .iter()
        .all(|name| name.starts_with(&prefix) || name.starts_with(&win_prefix))
        .then_some(torrent_name)
}

/// Join a raw upstream name onto a base path, splitting on both separators
/// so that back-slashed names become proper path components.
fn join_raw(base: &Path, raw: &str) -> PathBuf {
    raw.split(['/', '\\'])
        .filter(|part| !part.is_empty())
        .fold(base.to_path_buf(), |acc, part| acc.join(part))
}

/// Resolve a torrent's flat file listing into its logical layout.
pub fn resolve_listing(torrent: &TorrentInfo, file_names: &[String]) -> ResolvedListing {
    let root = detect_root_folder(&torrent.name, file_names);
    let base = (!torrent.save_path.is_empty()).then(|| PathBuf::from(&torrent.save_path));

    let logical_dir = match (&base, root) {
        (Some(base), Some(root)) => Some(base.join(root)),
        (Some(base), None) => Some(base.clone()),
        (None, _) if !torrent.content_path.is_empty() => {
            Path::new(&torrent.content_path).parent().map(Path::to_path_buf)
        }
        (None, _) => None,
    };

    let all_entries: Vec<TorrentFile> = file_names
        .iter()
        .map(|raw| {
            let relative_name = match root {
                Some(root) => raw[root.len() + 1..].to_string(),
                None => raw.clone(),
            };
            let full_path = match &base {
                Some(base) => join_raw(base, raw),
                None => join_raw(Path::new(""), raw),
            };
            TorrentFile {
                relative_name,
                full_path,
            }
        })
        .collect();

    let top_level = all_entries
        .iter()
        .filter(|entry| !entry.is_nested())
        .cloned()
        .collect();

    ResolvedListing {
        name: torrent.display_name(),
        logical_dir,
        top_level,
        all_entries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn torrent(name: &str, save_path: &str) -> TorrentInfo {
        TorrentInfo {
            hash: "abc123".to_string(),
            name: name.to_string(),
            save_path: save_path.to_string(),
            content_path: String::new(),
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_root_folder_is_stripped() {
        let t = torrent("Show.S01", "/data");
        let listing = resolve_listing(&t, &names(&["Show.S01/ep1.mkv", "Show.S01/ep2.mkv"]));

        assert_eq!(listing.logical_dir, Some(PathBuf::from("/data/Show.S01")));
        assert_eq!(listing.top_level.len(), 2);
        assert_eq!(listing.top_level[0].relative_name, "ep1.mkv");
        assert_eq!(
            listing.top_level[0].full_path,
            PathBuf::from("/data/Show.S01/ep1.mkv")
        );
    }

    #[test]
    fn test_backslash_root_folder() {
        let t = torrent("Movie", "/data");
        let listing = resolve_listing(&t, &names(&["Movie\\cd1.avi", "Movie\\cd2.avi"]));

        assert_eq!(listing.logical_dir, Some(PathBuf::from("/data/Movie")));
        assert_eq!(listing.top_level[1].relative_name, "cd2.avi");
        assert_eq!(listing.top_level[1].full_path, PathBuf::from("/data/Movie/cd2.avi"));
    }

    #[test]
    fn test_loose_files_keep_raw_names() {
        let t = torrent("Loose", "/downloads");
        let listing = resolve_listing(&t, &names(&["a.mp4", "b.mp4"]));

        assert_eq!(listing.logical_dir, Some(PathBuf::from("/downloads")));
        assert_eq!(listing.top_level[0].relative_name, "a.mp4");
        assert_eq!(listing.top_level[0].full_path, PathBuf::from("/downloads/a.mp4"));
    }

    #[test]
    fn test_partial_prefix_is_not_a_root() {
        let t = torrent("Show", "/data");
        let listing = resolve_listing(&t, &names(&["Show/ep1.mkv", "extra.nfo"]));

        assert_eq!(listing.logical_dir, Some(PathBuf::from("/data")));
        // "Show/ep1.mkv" keeps its separator and is no longer top-level
        assert_eq!(listing.top_level.len(), 1);
        assert_eq!(listing.top_level[0].relative_name, "extra.nfo");
        assert_eq!(listing.all_entries.len(), 2);
    }

    #[test]
    fn test_nested_entries_only_in_all_entries() {
        let t = torrent("Show", "/data");
        let listing = resolve_listing(
            &t,
            &names(&["Show/ep1.mkv", "Show/Audio/ep1.eng.ac3", "Show\\Subs\\ep1.srt"]),
        );

        assert_eq!(listing.top_level.len(), 1);
        assert_eq!(listing.all_entries.len(), 3);
        assert_eq!(listing.all_entries[1].relative_name, "Audio/ep1.eng.ac3");
        assert_eq!(listing.all_entries[1].file_name(), "ep1.eng.ac3");
        assert_eq!(
            listing.all_entries[2].full_path,
            PathBuf::from("/data/Show/Subs/ep1.srt")
        );
    }

    #[test]
    fn test_empty_listing_still_has_directory() {
        let t = torrent("Empty", "/data");
        let listing = resolve_listing(&t, &[]);

        assert!(listing.is_empty());
        assert!(listing.top_level.is_empty());
        assert_eq!(listing.logical_dir, Some(PathBuf::from("/data")));
    }

    #[test]
    fn test_missing_save_path_uses_content_parent() {
        let t = TorrentInfo {
            hash: "h".to_string(),
            name: "x".to_string(),
            save_path: String::new(),
            content_path: "/mnt/media/x/file.mkv".to_string(),
        };
        let listing = resolve_listing(&t, &names(&["file.mkv"]));

        assert_eq!(listing.logical_dir, Some(PathBuf::from("/mnt/media/x")));
        assert_eq!(listing.top_level[0].full_path, PathBuf::from("file.mkv"));
    }

    #[test]
    fn test_display_name_fallbacks() {
        let mut t = TorrentInfo::default();
        assert_eq!(t.display_name(), "Torrent");
        t.hash = "deadbeef".to_string();
        assert_eq!(t.display_name(), "deadbeef");
        t.name = "Named".to_string();
        assert_eq!(t.display_name(), "Named");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_top_level_never_contains_separators(
            parts in proptest::collection::vec("[a-z]{1,6}(/[a-z]{1,6}){0,2}\\.mkv", 0..12),
        ) {
            let t = torrent("Root", "/base");
            let listing = resolve_listing(&t, &parts);

            prop_assert_eq!(listing.all_entries.len(), parts.len());
            for entry in &listing.top_level {
                prop_assert!(!entry.relative_name.contains('/'));
                prop_assert!(!entry.relative_name.contains('\\'));
            }
        }
    }
}
