//! CLI end-to-end tests
//!
//! Tests for the frameseek command-line interface against generated MP4 files.

mod common;

use assert_cmd::prelude::*;
use common::{TestMedia, FRAMES};
use frameseek_media::synth::SyntheticStream;
use predicates::prelude::*;
use std::process::Command;

/// Get a command for the frameseek binary
#[allow(deprecated)]
fn frameseek_cmd() -> Command {
    Command::cargo_bin("frameseek").unwrap()
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).unwrap()
}

#[test]
fn test_cli_no_args_shows_help() {
    frameseek_cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_help_flag() {
    frameseek_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("frameseek"))
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_version_flag() {
    frameseek_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("frameseek"));
}

#[test]
fn test_cli_probe_help() {
    frameseek_cmd()
        .args(["probe", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("keyframe index"));
}

#[test]
fn test_cli_probe() {
    let media = TestMedia::new();
    let clip = media.clip();

    frameseek_cmd()
        .arg("probe")
        .arg(&clip)
        .assert()
        .success()
        .stdout(predicate::str::contains("Frames: 120"))
        .stdout(predicate::str::contains("Keyframes: 4"))
        .stdout(predicate::str::contains("0, 30, 60, 90"))
        .stdout(predicate::str::contains("Worst-case seek replay: 29 frames"));
}

#[test]
fn test_cli_probe_json() {
    let media = TestMedia::new();
    let clip = media.clip();

    let stdout = stdout_of(frameseek_cmd().arg("probe").arg(&clip).arg("--json"));
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["stream"]["totalFrames"], FRAMES);
    assert_eq!(json["keyframes"], serde_json::json!([0, 30, 60, 90]));
    assert_eq!(json["max_replay"], 29);
}

#[test]
fn test_cli_probe_nonexistent_file() {
    frameseek_cmd()
        .args(["probe", "/nonexistent/path/clip.mp4"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("exist"));
}

#[test]
fn test_cli_probe_rejects_file_without_video() {
    let media = TestMedia::new();
    let path = media.write("audio.mp4", &SyntheticStream::new(10, 30.0).without_video());

    frameseek_cmd().arg("probe").arg(&path).assert().failure();
}

#[test]
fn test_cli_probe_rejects_garbage() {
    let media = TestMedia::new();
    let path = media.write_bytes("garbage.mp4", &[0xAB; 64]);

    frameseek_cmd().arg("probe").arg(&path).assert().failure();
}

#[test]
fn test_cli_frame_reports_replay() {
    let media = TestMedia::new();
    let clip = media.clip();

    frameseek_cmd()
        .arg("frame")
        .arg(&clip)
        .arg("100")
        .assert()
        .success()
        .stdout(predicate::str::contains("Frame: 100"))
        .stdout(predicate::str::contains("Keyframe: 90 (replayed 10)"))
        .stdout(predicate::str::contains("Checksum: "));
}

#[test]
fn test_cli_frame_out_of_range() {
    let media = TestMedia::new();
    let clip = media.clip();

    frameseek_cmd()
        .arg("frame")
        .arg(&clip)
        .arg("120")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to seek to frame 120"));
}

#[test]
fn test_cli_play_limited_frames() {
    let media = TestMedia::new();
    let clip = media.clip();

    let stdout = stdout_of(
        frameseek_cmd()
            .arg("play")
            .arg(&clip)
            .args(["--from", "40", "--frames", "5"]),
    );
    let indices: Vec<u32> = stdout
        .lines()
        .map(|line| line.split('\t').next().unwrap().parse().unwrap())
        .collect();
    assert_eq!(indices, vec![40, 41, 42, 43, 44]);
}

#[test]
fn test_cli_play_to_end() {
    let media = TestMedia::new();
    let path = media.write(
        "short.mp4",
        &SyntheticStream::new(24, 240.0).keyframe_interval(8),
    );

    let stdout = stdout_of(frameseek_cmd().arg("play").arg(&path).args(["--from", "10"]));
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 14);
    assert!(lines[0].starts_with("10\t"));
    assert!(lines[13].starts_with("23\t"));
}

#[test]
fn test_cli_frame_matches_playback() {
    let media = TestMedia::new();
    let clip = media.clip();

    let played = stdout_of(
        frameseek_cmd()
            .arg("play")
            .arg(&clip)
            .args(["--from", "57", "--frames", "1"]),
    );
    let played_checksum = played.trim().rsplit('\t').next().unwrap().to_string();

    let seeked = stdout_of(frameseek_cmd().arg("frame").arg(&clip).arg("57"));
    let seeked_checksum = seeked
        .lines()
        .find_map(|line| line.strip_prefix("Checksum: "))
        .unwrap();

    assert_eq!(played_checksum, seeked_checksum);
}

#[test]
fn test_cli_verify() {
    let media = TestMedia::new();
    let clip = media.clip();

    frameseek_cmd()
        .arg("verify")
        .arg(&clip)
        .args(["--stride", "13"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "All 11 sampled frames match sequential decode (120 frames total)",
        ));
}

#[test]
fn test_cli_check_config_valid() {
    let media = TestMedia::new();
    let path = media.write_bytes("frameseek.toml", b"[player]\nmax_decode_queue = 8\n");

    frameseek_cmd()
        .arg("check-config")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("Max decode queue: 8"));
}

#[test]
fn test_cli_check_config_invalid() {
    let media = TestMedia::new();
    let path = media.write_bytes("frameseek.toml", b"[demux]\nbatch_size = 0\n");

    frameseek_cmd()
        .arg("check-config")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("batch_size"));
}

#[test]
fn test_cli_check_config_defaults() {
    let media = TestMedia::new();

    frameseek_cmd()
        .arg("check-config")
        .current_dir(media.path())
        .env("HOME", media.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_cli_global_config_applies_to_probe() {
    let media = TestMedia::new();
    let clip = media.clip();
    let config = media.write_bytes("bad.toml", b"[player]\nflush_timeout_ms = 0\n");

    frameseek_cmd()
        .arg("--config")
        .arg(&config)
        .arg("probe")
        .arg(&clip)
        .assert()
        .failure()
        .stderr(predicate::str::contains("flush_timeout_ms"));
}
