//! Integration tests for conduit-cli.
//!
//! Tests invoke the built binary on graph descriptions written to a
//! temporary directory. Hardware nodes run on the manual backend so no audio
//! device is needed.

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

/// Helper to get the path to the `conduit` binary built by cargo.
fn conduit_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_conduit"))
}

fn write_graph(dir: &Path, text: &str) -> std::path::PathBuf {
    let path = dir.join("graph.toml");
    std::fs::write(&path, text).unwrap();
    path
}

// ---------------------------------------------------------------------------
// `conduit plugins`
// ---------------------------------------------------------------------------

#[test]
fn cli_plugins_lists_every_type() {
    let output = conduit_bin()
        .arg("plugins")
        .output()
        .expect("failed to run conduit plugins");
    assert!(output.status.success(), "conduit plugins failed");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Available Plugins"));
    for name in [
        "gain",
        "hardware",
        "mixer",
        "null",
        "passthrough",
        "tone",
        "wav.reader",
        "wav.writer",
    ] {
        assert!(stdout.contains(name), "plugin listing should contain '{name}'");
    }
    assert!(stdout.contains("threaded-driver"));
}

// ---------------------------------------------------------------------------
// `conduit run`
// ---------------------------------------------------------------------------

#[test]
fn cli_run_renders_a_file() {
    let dir = TempDir::new().unwrap();
    let wav = dir.path().join("tone.wav");
    let graph = write_graph(
        dir.path(),
        &format!(
            r#"
            [graph]
            "graph.name" = "render"
            config.buffer_size = 128

            [[node]]
            object.type = "tone"
            node.name = "osc"
            source.out = "audio"
            config.blocks = 8

            [[node]]
            object.type = "wav.writer"
            node.name = "file"
            sink.in = "audio"
            config.path = "{}"

            [[link]]
            from = "osc:out"
            to = "file:in"

            [[subscribe]]
            signal = "osc:end_of_stream"
            slot = "file:stop"
            "#,
            wav.display().to_string().replace('\\', "/")
        ),
    );

    let output = conduit_bin()
        .args(["run", "--threads", "2", "--backend", "manual"])
        .arg(&graph)
        .output()
        .expect("failed to run conduit run");
    assert!(
        output.status.success(),
        "conduit run failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("Done."));

    let reader = hound::WavReader::open(&wav).unwrap();
    assert_eq!(reader.duration(), 8 * 128);
}

#[test]
fn cli_run_drives_hardware_on_the_manual_backend() {
    let dir = TempDir::new().unwrap();
    let graph = write_graph(
        dir.path(),
        r#"
        [graph]
        config.buffer_size = 64

        [[node]]
        object.type = "tone"
        node.name = "osc"
        source.out = "audio"

        [[node]]
        object.type = "hardware"
        node.name = "hw"
        sink.playback = "audio"

        [[link]]
        from = "osc:out"
        to = "hw:playback"
        "#,
    );

    let output = conduit_bin()
        .args(["run", "--backend", "manual", "--periods", "16"])
        .arg(&graph)
        .output()
        .expect("failed to run conduit run");
    assert!(
        output.status.success(),
        "conduit run failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn cli_run_reports_a_missing_file() {
    let dir = TempDir::new().unwrap();
    let output = conduit_bin()
        .arg("run")
        .arg(dir.path().join("absent.toml"))
        .output()
        .expect("failed to run conduit run");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to read file"));
}

#[test]
fn cli_run_rejects_an_unknown_plugin() {
    let dir = TempDir::new().unwrap();
    let graph = write_graph(
        dir.path(),
        r#"
        [[node]]
        object.type = "theremin"
        node.name = "t"
        "#,
    );
    let output = conduit_bin()
        .args(["run", "--backend", "manual"])
        .arg(&graph)
        .output()
        .expect("failed to run conduit run");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown plugin type 'theremin'"));
}
