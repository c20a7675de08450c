use assert_cmd::Command;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn ffmpeg_with_encoders(names: &[&str]) -> bool {
    std::process::Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .output()
        .map(|o| {
            let encoders = String::from_utf8_lossy(&o.stdout);
            o.status.success() && names.iter().all(|name| encoders.contains(name))
        })
        .unwrap_or(false)
}

/// One second of test pattern and tone in a QuickTime container.
fn write_recording(path: &Path) {
    let status = std::process::Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "error", "-y"])
        .args(["-f", "lavfi", "-i", "testsrc=duration=1:size=160x120:rate=25"])
        .args(["-f", "lavfi", "-i", "sine=frequency=440:duration=1"])
        .args(["-c:v", "mpeg4", "-c:a", "aac", "-shortest"])
        .arg(path)
        .status()
        .expect("run ffmpeg");
    assert!(status.success(), "ffmpeg failed to create {}", path.display());
}

fn combined_output(output: &std::process::Output) -> String {
    format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

fn clipnorm() -> Command {
    let mut cmd = Command::cargo_bin("clipnorm").expect("binary built");
    cmd.env_remove("CLIPNORM_MEDIA_DIR")
        .env_remove("CLIPNORM_JOBS")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_normalization_flags() {
    let output = clipnorm().arg("--help").output().expect("--help runs");

    assert!(output.status.success());
    let text = combined_output(&output);
    for flag in [
        "--input-ext",
        "--output-ext",
        "--video-codec",
        "--audio-codec",
        "--skip-existing",
        "--fail-fast",
        "--poster",
        "--jobs",
    ] {
        assert!(text.contains(flag), "help text missing {flag}: {text}");
    }
}

#[test]
fn directory_without_recordings_succeeds_and_creates_nothing() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("motion.json"), b"[]").unwrap();
    fs::write(dir.path().join("labels.csv"), b"t,label\n").unwrap();

    let output = clipnorm().arg(dir.path()).output().expect("clipnorm runs");

    assert!(output.status.success(), "{}", combined_output(&output));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
}

#[test]
fn media_dir_can_come_from_environment() {
    let dir = TempDir::new().unwrap();

    let output = clipnorm()
        .env("CLIPNORM_MEDIA_DIR", dir.path())
        .output()
        .expect("clipnorm runs");

    assert!(output.status.success(), "{}", combined_output(&output));
}

#[test]
fn missing_directory_fails() {
    let dir = TempDir::new().unwrap();

    let output = clipnorm()
        .arg(dir.path().join("nope"))
        .output()
        .expect("clipnorm runs");

    assert!(!output.status.success());
    let text = combined_output(&output);
    assert!(
        text.contains("media directory unavailable"),
        "unexpected output: {text}"
    );
}

#[test]
fn broken_recording_fails_the_run() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("broken.mov"), b"garbage").unwrap();

    let output = clipnorm()
        .arg(dir.path())
        .arg("--jobs")
        .arg("2")
        .output()
        .expect("clipnorm runs");

    assert!(!output.status.success());
    let text = combined_output(&output);
    assert!(text.contains("1 of 1 recordings failed"), "{text}");
    assert!(!dir.path().join("broken.mp4").exists());
}

#[test]
fn broken_recording_does_not_stop_the_batch() {
    if !ffmpeg_with_encoders(&["libx264"]) {
        eprintln!("skipping: ffmpeg with libx264 not available");
        return;
    }
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.mov"), b"garbage").unwrap();
    write_recording(&dir.path().join("b.mov"));

    let output = clipnorm().arg(dir.path()).output().expect("clipnorm runs");

    assert!(!output.status.success());
    let text = combined_output(&output);
    assert!(text.contains("1 of 2 recordings failed"), "{text}");
    assert!(!dir.path().join("a.mp4").exists());
    assert!(dir.path().join("b.mp4").is_file(), "{text}");
}

#[test]
fn fail_fast_stops_at_the_first_broken_recording() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.mov"), b"garbage").unwrap();
    fs::write(dir.path().join("b.mov"), b"garbage").unwrap();

    let output = clipnorm()
        .arg(dir.path())
        .arg("--fail-fast")
        .output()
        .expect("clipnorm runs");

    assert!(!output.status.success());
    let text = combined_output(&output);
    assert!(text.contains("source unreadable"), "{text}");
    assert!(text.contains("a.mov"), "{text}");
    assert!(!text.contains("b.mov"), "second recording was attempted: {text}");
    assert!(!text.contains("recordings failed"), "{text}");
}

#[test]
fn same_input_and_output_extension_is_refused() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("clip.mov");
    fs::write(&source, b"raw recording").unwrap();

    let output = clipnorm()
        .arg(dir.path())
        .args(["--input-ext", "mov", "--output-ext", "MOV"])
        .output()
        .expect("clipnorm runs");

    assert!(!output.status.success());
    let text = combined_output(&output);
    assert!(text.contains("invalid configuration"), "{text}");
    assert_eq!(fs::read(&source).unwrap(), b"raw recording");
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn hevc_and_mp3_can_be_selected() {
    if !ffmpeg_with_encoders(&["libx265", "libmp3lame"]) {
        eprintln!("skipping: ffmpeg with libx265 and libmp3lame not available");
        return;
    }
    let dir = TempDir::new().unwrap();
    write_recording(&dir.path().join("clip.mov"));

    let output = clipnorm()
        .arg(dir.path())
        .args(["--video-codec", "hevc", "--audio-codec", "mp3"])
        .output()
        .expect("clipnorm runs");

    assert!(output.status.success(), "{}", combined_output(&output));
    assert!(dir.path().join("clip.mp4").is_file());
}
