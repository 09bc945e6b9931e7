use std::fs;
use std::process::Command;

use tempfile::TempDir;

fn odscap() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_odscap"));
    command.env_remove("ODSCAP_CONFIG").env("RUST_LOG", "warn");
    command
}

#[test]
fn capture_writes_strips_and_session_report() {
    let root = TempDir::new().unwrap();
    let output = root.path().join("out");

    let status = odscap()
        .args(["--frames", "2", "--frame-size", "8", "--readback", "immediate"])
        .arg("--output")
        .arg(&output)
        .status()
        .expect("failed to run odscap");
    assert!(status.success());

    for name in ["frame-00000.png", "frame-00001.png"] {
        let strip = image::open(output.join(name)).unwrap();
        assert_eq!((strip.width(), strip.height()), (48, 16));
    }

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(output.join("session.json")).unwrap()).unwrap();
    assert_eq!(report["frames_written"], 2);
    assert_eq!(report["process_calls"], 12);
    assert_eq!(report["readback"], "immediate");
    assert_eq!(report["program"], "ods");
    assert_eq!(report["cancelled"], false);
}

#[test]
fn config_file_drives_the_session() {
    let root = TempDir::new().unwrap();
    let output = root.path().join("captures");
    let config = root.path().join("capture.toml");
    fs::write(
        &config,
        format!(
            r#"
version = 1

[capture]
frame_size = 4
frames = 1
fps = 24

[output]
directory = "{}"
"#,
            output.display()
        ),
    )
    .unwrap();

    let status = odscap()
        .arg("--config")
        .arg(&config)
        .status()
        .expect("failed to run odscap with config");
    assert!(status.success());

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(output.join("session.json")).unwrap()).unwrap();
    assert_eq!(report["frame_size"], 4);
    assert_eq!(report["fps"], 24.0);
    assert_eq!(report["process_calls"], 12);
}

#[test]
fn check_shaders_accepts_bundled_program() {
    let result = odscap()
        .arg("check-shaders")
        .output()
        .expect("failed to run odscap check-shaders");
    assert!(result.status.success());
    assert!(String::from_utf8_lossy(&result.stdout).contains("ods: ok"));
}

#[test]
fn check_shaders_reports_compile_errors() {
    let root = TempDir::new().unwrap();
    let vertex = root.path().join("broken.vert");
    let fragment = root.path().join("broken.frag");
    fs::write(&vertex, "void main() {}\n").unwrap();
    fs::write(&fragment, "void main() {\n    float x = ;\n}\n").unwrap();

    let result = odscap()
        .arg("check-shaders")
        .arg("--vertex")
        .arg(&vertex)
        .arg("--fragment")
        .arg(&fragment)
        .output()
        .expect("failed to run odscap check-shaders");
    assert!(!result.status.success());
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains("broken"), "stderr: {stderr}");
    assert!(stderr.contains("fragment"), "stderr: {stderr}");
}

#[test]
fn missing_shader_file_fails_before_capturing() {
    let root = TempDir::new().unwrap();
    let output = root.path().join("out");
    let status = odscap()
        .arg("--vertex")
        .arg(root.path().join("absent.vert"))
        .arg("--fragment")
        .arg(root.path().join("absent.frag"))
        .arg("--output")
        .arg(&output)
        .status()
        .expect("failed to run odscap");
    assert!(!status.success());
    assert!(!output.exists());
}

#[cfg(unix)]
#[test]
fn interrupt_stops_the_session_and_keeps_the_report() {
    use std::thread;
    use std::time::{Duration, Instant};

    let root = TempDir::new().unwrap();
    let output = root.path().join("out");
    let mut child = odscap()
        .args(["--frames", "100000", "--frame-size", "16", "--readback", "immediate"])
        .arg("--output")
        .arg(&output)
        .spawn()
        .expect("failed to spawn odscap");

    let deadline = Instant::now() + Duration::from_secs(30);
    while !output.join("frame-00000.png").exists() {
        assert!(Instant::now() < deadline, "no frame written before the deadline");
        thread::sleep(Duration::from_millis(20));
    }
    let signalled = Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .expect("failed to run kill");
    assert!(signalled.success());

    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        if Instant::now() > deadline {
            child.kill().unwrap();
            panic!("odscap ignored the interrupt");
        }
        thread::sleep(Duration::from_millis(20));
    };
    assert!(status.success());

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(output.join("session.json")).unwrap()).unwrap();
    assert_eq!(report["cancelled"], true);
    assert!(report["frames_written"].as_u64().unwrap() < 100000);
}
