use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::clip_store::ClipRecord;

const DEFAULT_ENCODER_BINARY: &str = "ffmpeg";

/// Cuts the clip segment out of the recorded source and produces the upload
/// artifact.
#[async_trait]
pub trait ClipEncoder: Send + Sync {
    async fn encode(&self, record: &ClipRecord, output_dir: &Path) -> Result<PathBuf>;
}

/// Deterministic ffmpeg argument list for one clip.
pub fn build_encode_args(
    source_path: &str,
    start_offset_seconds: u64,
    duration_seconds: u64,
    output_path: &Path,
) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-ss".to_string(),
        start_offset_seconds.to_string(),
        "-i".to_string(),
        source_path.to_string(),
        "-t".to_string(),
        duration_seconds.to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-y".to_string(),
        output_path.display().to_string(),
    ]
}

/// Encoder backed by an external ffmpeg subprocess.
pub struct FfmpegEncoder {
    binary_path: Option<PathBuf>,
}

impl FfmpegEncoder {
    /// `binary_path` pins a specific binary; when it is unset or the file is
    /// absent the encoder falls back to resolving `ffmpeg` on `PATH`.
    pub fn new(binary_path: Option<PathBuf>) -> Self {
        Self { binary_path }
    }

    fn resolve_binary(&self) -> PathBuf {
        match self.binary_path.as_deref() {
            Some(path) if path.exists() => path.to_path_buf(),
            _ => PathBuf::from(DEFAULT_ENCODER_BINARY),
        }
    }
}

#[async_trait]
impl ClipEncoder for FfmpegEncoder {
    async fn encode(&self, record: &ClipRecord, output_dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .with_context(|| format!("failed to create {}", output_dir.display()))?;
        let output_path = output_dir.join(format!("{}.mp4", record.clip_id));
        let binary = self.resolve_binary();
        let args = build_encode_args(
            &record.source.path,
            record.source.start_offset_seconds,
            record.source.duration_seconds,
            &output_path,
        );
        debug!(
            clip_id = record.clip_id.as_str(),
            binary = %binary.display(),
            "starting encode"
        );
        let output = Command::new(&binary)
            .args(&args)
            .output()
            .await
            .with_context(|| format!("failed to spawn encoder {}", binary.display()))?;
        if !output.status.success() {
            bail!(
                "encoder exited with {}: stdout={} stderr={}",
                output.status,
                String::from_utf8_lossy(&output.stdout).trim(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output_path)
    }
}

#[cfg(test)]
mod tests {
    use strim_events::Platform;

    use crate::clip_store::{ClipDestination, ClipRequester, ClipSource, ClipState};

    use super::*;

    fn sample_record() -> ClipRecord {
        ClipRecord {
            clip_id: "ab12cd34".to_string(),
            tenant_id: "creator-1".to_string(),
            title: "Great save 20260829-ab12cd34".to_string(),
            source: ClipSource {
                path: "/var/recordings/stream.ts".to_string(),
                title: "Great save".to_string(),
                start_offset_seconds: 120,
                duration_seconds: 30,
            },
            requester: ClipRequester {
                id: "u-1".to_string(),
                name: "Viewer".to_string(),
            },
            destination: ClipDestination {
                platform: Platform::Twitch,
                channel_url: "https://twitch.tv/creator1".to_string(),
            },
            state: ClipState::Encoding,
            output_path: None,
            published_url: None,
            last_error: None,
            requested_unix_ms: 0,
            updated_unix_ms: 0,
            history: Vec::new(),
        }
    }

    #[test]
    fn unit_encode_args_are_deterministic() {
        let args = build_encode_args("/var/recordings/stream.ts", 120, 30, Path::new("/tmp/out.mp4"));
        let expected: Vec<&str> = vec![
            "-hide_banner",
            "-loglevel",
            "error",
            "-ss",
            "120",
            "-i",
            "/var/recordings/stream.ts",
            "-t",
            "30",
            "-c:v",
            "libx264",
            "-preset",
            "veryfast",
            "-c:a",
            "aac",
            "-y",
            "/tmp/out.mp4",
        ];
        assert_eq!(args, expected);
    }

    #[test]
    fn unit_missing_configured_binary_falls_back_to_path_lookup() {
        let encoder = FfmpegEncoder::new(Some(PathBuf::from("/nonexistent/ffmpeg-custom")));
        assert_eq!(encoder.resolve_binary(), PathBuf::from("ffmpeg"));
        let encoder = FfmpegEncoder::new(None);
        assert_eq!(encoder.resolve_binary(), PathBuf::from("ffmpeg"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn functional_nonzero_exit_surfaces_captured_diagnostics() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("fake-ffmpeg");
        std::fs::write(&script, "#!/bin/sh\necho boom >&2\nexit 3\n").expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("chmod");

        let encoder = FfmpegEncoder::new(Some(script));
        let error = encoder
            .encode(&sample_record(), dir.path())
            .await
            .expect_err("non-zero exit");
        let message = error.to_string();
        assert!(message.contains("encoder exited with"), "{message}");
        assert!(message.contains("boom"), "{message}");
    }
}
