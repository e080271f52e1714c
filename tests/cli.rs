//! Exit-code contract of the `argus` binary: 0 for a clean stop (bounded
//! run or interrupt), 1 when the loop errors or a precondition fails.

use std::process::Command;
use std::time::Duration;

fn argus() -> Command {
    Command::new(env!("CARGO_BIN_EXE_argus"))
}

#[test]
fn bounded_clean_run_exits_zero() {
    let output = argus()
        .args([
            "--device",
            "synthetic",
            "--backend",
            "mock",
            "--interval",
            "0.05",
            "--duration",
            "0.2",
        ])
        .output()
        .expect("binary should spawn");
    assert_eq!(output.status.code(), Some(0), "{output:?}");
}

#[test]
fn invalid_interval_exits_one() {
    let output = argus()
        .args([
            "--device",
            "synthetic",
            "--backend",
            "mock",
            "--interval",
            "0",
        ])
        .output()
        .expect("binary should spawn");
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn missing_device_exits_one() {
    let output = argus()
        .args([
            "--device",
            "/dev/video-nonexistent",
            "--backend",
            "mock",
            "--no-gstreamer",
            "--interval",
            "0.05",
            "--duration",
            "0.2",
        ])
        .output()
        .expect("binary should spawn");
    assert_eq!(output.status.code(), Some(1));
}

#[cfg(unix)]
#[test]
fn interrupt_is_a_clean_stop() {
    // Unbounded run; SIGINT should finish the in-flight cycle and exit 0.
    let mut child = argus()
        .args([
            "--device",
            "synthetic",
            "--backend",
            "mock",
            "--interval",
            "0.05",
        ])
        .spawn()
        .expect("binary should spawn");

    // Give the process time to install its signal handler.
    std::thread::sleep(Duration::from_millis(600));
    unsafe {
        libc::kill(child.id() as i32, libc::SIGINT);
    }

    let status = child.wait().expect("child should be waitable");
    assert_eq!(status.code(), Some(0));
}
