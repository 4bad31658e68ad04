//! Shared helpers for integration tests.

#![allow(dead_code)]

use frameseek_media::synth::SyntheticStream;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Frames in the default test clip.
pub const FRAMES: u32 = 120;
/// Keyframe spacing of the default test clip.
pub const GOP: u32 = 30;

/// A temporary directory holding generated MP4 files.
pub struct TestMedia {
    pub dir: TempDir,
}

impl TestMedia {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create temp dir"),
        }
    }

    /// 120 frames at 120 fps, keyframes every 30.
    pub fn clip(&self) -> PathBuf {
        self.write(
            "clip.mp4",
            &SyntheticStream::new(FRAMES, 120.0).keyframe_interval(GOP),
        )
    }

    pub fn write(&self, name: &str, stream: &SyntheticStream) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, stream.build()).expect("failed to write test media");
        path
    }

    pub fn write_bytes(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, bytes).expect("failed to write test file");
        path
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}
