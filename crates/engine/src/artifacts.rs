//! Artifact harvesting from the run manifest.
//!
//! Video is kept by reference: the first video file encountered in
//! manifest order is copied into durable public storage under a unique
//! generated name, and only that relative name is returned. Screenshots
//! are assumed small and display-only, so every top-level `.png` is
//! returned inline as base64 data instead. Per-file failures are logged
//! and skipped; harvesting never aborts a run.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::{debug, warn};

use crate::process::RunManifest;

/// Extensions recognized as run recordings
pub const VIDEO_EXTENSIONS: [&str; 3] = ["webm", "mp4", "mov"];

/// Harvested artifacts for one execution
#[derive(Debug, Clone, Default)]
pub struct HarvestedArtifacts {
    /// Relative file name of the copied video in durable storage
    pub video_ref: Option<String>,
    /// Inline `data:image/png;base64,...` payloads, top-level shots only
    pub screenshots: Vec<String>,
}

pub struct ArtifactHarvester {
    storage_dir: PathBuf,
}

impl ArtifactHarvester {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
        }
    }

    /// Collect artifacts from a run manifest.
    ///
    /// `owner_key` is embedded into the durable video name
    /// (`<owner_key>-<epochMillis>.<ext>`) for traceability; unique names
    /// keep concurrent runs across different targets from colliding.
    pub fn collect(&self, manifest: &RunManifest, owner_key: &str) -> HarvestedArtifacts {
        let video_ref = self.copy_first_video(manifest, owner_key);
        let screenshots = inline_screenshots(manifest);
        HarvestedArtifacts {
            video_ref,
            screenshots,
        }
    }

    fn copy_first_video(&self, manifest: &RunManifest, owner_key: &str) -> Option<String> {
        let candidates = manifest.files.iter().filter(|p| is_video(p));

        for path in candidates {
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_string())
                .unwrap_or_else(|| "webm".to_string());
            let name = format!(
                "{}-{}.{}",
                owner_key,
                chrono::Utc::now().timestamp_millis(),
                ext
            );

            if let Err(e) = std::fs::create_dir_all(&self.storage_dir) {
                warn!("Cannot create video storage dir {:?}: {}", self.storage_dir, e);
                return None;
            }

            let dest = self.storage_dir.join(&name);
            match std::fs::copy(path, &dest) {
                Ok(_) => {
                    debug!("Copied video {:?} -> {:?}", path, dest);
                    return Some(name);
                }
                Err(e) => {
                    // Keep scanning; a later video may still be readable
                    warn!("Failed to copy video {:?}: {}", path, e);
                }
            }
        }
        None
    }
}

fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn is_top_level_png(manifest: &RunManifest, path: &Path) -> bool {
    manifest.is_top_level(path)
        && path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("png"))
            .unwrap_or(false)
}

fn inline_screenshots(manifest: &RunManifest) -> Vec<String> {
    manifest
        .files
        .iter()
        .filter(|p| is_top_level_png(manifest, p))
        .filter_map(|path| match std::fs::read(path) {
            Ok(bytes) => Some(format!("data:image/png;base64,{}", STANDARD.encode(bytes))),
            Err(e) => {
                warn!("Failed to read screenshot {:?}: {}", path, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_for(dir: &Path) -> RunManifest {
        RunManifest::scan(dir)
    }

    #[test]
    fn keeps_only_the_first_video() {
        let out = tempfile::tempdir().unwrap();
        let storage = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(out.path().join("a")).unwrap();
        std::fs::create_dir_all(out.path().join("b")).unwrap();
        std::fs::write(out.path().join("a/one.webm"), b"v1").unwrap();
        std::fs::write(out.path().join("b/two.webm"), b"v2").unwrap();
        std::fs::write(out.path().join("three.webm"), b"v3").unwrap();

        let harvester = ArtifactHarvester::new(storage.path());
        let artifacts = harvester.collect(&manifest_for(out.path()), "test-42");

        let video = artifacts.video_ref.expect("video expected");
        assert!(video.starts_with("test-42-"));
        assert!(video.ends_with(".webm"));

        let stored: Vec<_> = std::fs::read_dir(storage.path()).unwrap().collect();
        assert_eq!(stored.len(), 1, "exactly one video copied");
    }

    #[test]
    fn screenshots_are_top_level_only_and_inlined() {
        let out = tempfile::tempdir().unwrap();
        let storage = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(out.path().join("nested")).unwrap();
        std::fs::write(out.path().join("shot1.png"), b"p1").unwrap();
        std::fs::write(out.path().join("shot2.png"), b"p2").unwrap();
        std::fs::write(out.path().join("nested/deep.png"), b"p3").unwrap();

        let harvester = ArtifactHarvester::new(storage.path());
        let artifacts = harvester.collect(&manifest_for(out.path()), "test-1");

        assert_eq!(artifacts.screenshots.len(), 2);
        for shot in &artifacts.screenshots {
            assert!(shot.starts_with("data:image/png;base64,"));
        }
        assert!(artifacts.video_ref.is_none());
    }

    #[test]
    fn empty_manifest_harvests_nothing() {
        let out = tempfile::tempdir().unwrap();
        let storage = tempfile::tempdir().unwrap();
        let harvester = ArtifactHarvester::new(storage.path());
        let artifacts = harvester.collect(&manifest_for(out.path()), "all-tests");
        assert!(artifacts.video_ref.is_none());
        assert!(artifacts.screenshots.is_empty());
    }

    #[test]
    fn unreadable_screenshot_is_skipped_not_fatal() {
        let out = tempfile::tempdir().unwrap();
        let storage = tempfile::tempdir().unwrap();
        std::fs::write(out.path().join("ok.png"), b"fine").unwrap();

        // Manifest references a file deleted after the scan
        let mut manifest = manifest_for(out.path());
        manifest.files.push(out.path().join("gone.png"));

        let harvester = ArtifactHarvester::new(storage.path());
        let artifacts = harvester.collect(&manifest, "test-9");
        assert_eq!(artifacts.screenshots.len(), 1);
    }

    #[test]
    fn video_extension_is_preserved() {
        let out = tempfile::tempdir().unwrap();
        let storage = tempfile::tempdir().unwrap();
        std::fs::write(out.path().join("run.MP4"), b"v").unwrap();

        let harvester = ArtifactHarvester::new(storage.path());
        let artifacts = harvester.collect(&manifest_for(out.path()), "all-tests");
        let video = artifacts.video_ref.unwrap();
        assert!(video.starts_with("all-tests-"));
        assert!(video.ends_with(".MP4"));
    }
}
