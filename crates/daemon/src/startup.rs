//! Startup probe for the transform binary.
//!
//! The server starts even when ffmpeg is missing; every job then reports
//! the spawn failure on its own channel. The probe only makes the problem
//! visible in the server log at boot.

use crate::config::Config;
use std::path::Path;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

/// Error types for the startup probe
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Failed to run {bin} -version: {source}")]
    Spawn {
        bin: String,
        source: std::io::Error,
    },

    #[error("{0} -version exited unsuccessfully")]
    Failed(String),

    #[error("Could not parse ffmpeg version from: {0}")]
    UnknownVersion(String),
}

/// Extract the major version from `ffmpeg -version` output.
///
/// Handles plain (`8.0.1`) and git-describe style (`n7.1-12-gabcdef`)
/// versions.
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let line = version_output
        .lines()
        .map(str::to_lowercase)
        .find(|line| line.contains("ffmpeg version"))?;

    let token = line
        .split("ffmpeg version")
        .nth(1)?
        .split_whitespace()
        .next()?
        .to_string();

    token
        .trim_start_matches('n')
        .split(['.', '-'])
        .next()?
        .parse()
        .ok()
}

/// Run `{bin} -version` and return the detected major version.
pub async fn check_ffmpeg_available(bin: &Path) -> Result<u32, StartupError> {
    let display = bin.display().to_string();
    let output = Command::new(bin)
        .arg("-version")
        .output()
        .await
        .map_err(|source| StartupError::Spawn {
            bin: display.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(StartupError::Failed(display));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_ffmpeg_version(&stdout).ok_or_else(|| {
        StartupError::UnknownVersion(stdout.lines().next().unwrap_or("(empty)").to_string())
    })
}

/// Probe the configured ffmpeg binary and log the outcome. Never fails.
pub async fn run_startup_checks(cfg: &Config) -> Option<u32> {
    match check_ffmpeg_available(&cfg.transform.ffmpeg_bin).await {
        Ok(major) => {
            info!(
                ffmpeg = %cfg.transform.ffmpeg_bin.display(),
                major,
                "ffmpeg available"
            );
            Some(major)
        }
        Err(e) => {
            warn!(error = %e, "ffmpeg probe failed; jobs will report launch errors");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_release_versions_parse(
            major in 1u32..20,
            minor in 0u32..10,
            patch in 0u32..10,
        ) {
            let output = format!(
                "ffmpeg version {}.{}.{} Copyright (c) 2000-2024 the FFmpeg developers\nbuilt with gcc 12.2.0",
                major, minor, patch
            );
            prop_assert_eq!(parse_ffmpeg_version(&output), Some(major));
        }

        #[test]
        fn prop_git_versions_parse(
            major in 1u32..20,
            minor in 0u32..10,
            git_hash in "[a-f0-9]{7}",
        ) {
            let output = format!(
                "ffmpeg version n{}.{}-123-g{} Copyright (c) 2000-2024",
                major, minor, git_hash
            );
            prop_assert_eq!(parse_ffmpeg_version(&output), Some(major));
        }
    }

    #[test]
    fn test_parse_ffmpeg_version_examples() {
        assert_eq!(parse_ffmpeg_version("ffmpeg version 6.1.1-3ubuntu5 Copyright"), Some(6));
        assert_eq!(
            parse_ffmpeg_version("banner\nFFmpeg version n8.0-5-g1234567\nconfiguration: --enable-gpl"),
            Some(8)
        );
    }

    #[test]
    fn test_parse_ffmpeg_version_invalid() {
        assert_eq!(parse_ffmpeg_version("not ffmpeg output"), None);
        assert_eq!(parse_ffmpeg_version(""), None);
        assert_eq!(parse_ffmpeg_version("ffmpeg version git-2024-01-01"), None);
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let err = check_ffmpeg_available(Path::new("/nonexistent/ffmpeg"))
            .await
            .unwrap_err();
        assert!(matches!(err, StartupError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_startup_checks_never_fail() {
        let mut cfg = Config::default();
        cfg.transform.ffmpeg_bin = "/nonexistent/ffmpeg".into();
        assert_eq!(run_startup_checks(&cfg).await, None);
    }
}
