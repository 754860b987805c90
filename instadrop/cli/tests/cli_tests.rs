use std::{
    fs,
    io::{BufRead, BufReader},
    net::{TcpListener, TcpStream},
    process::{Child, Command, Stdio},
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::{PredicateBooleanExt, predicate};
use tempfile::TempDir;

/// `instadrop` with its config directory and home inside `home`.
fn instadrop(home: &TempDir) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("instadrop");
    cmd.env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("HOME", home.path())
        .env_remove("INSTADROP_API_URL")
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(home: &TempDir, contents: &str) {
    let dir = home.path().join("config").join("instadrop");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("config.toml"), contents).unwrap();
}

#[test]
fn test_cli_config_falls_back_to_home_config() {
    let home = TempDir::new().unwrap();
    instadrop(&home)
        .env("XDG_CONFIG_HOME", "")
        .args(["config", "set-join-base", "https://drop.example.com/join"])
        .assert()
        .success();

    let saved = fs::read_to_string(
        home.path().join(".config").join("instadrop").join("config.toml"),
    )
    .unwrap();
    assert!(saved.contains("https://drop.example.com/join"), "{saved}");
}

#[test]
fn test_cli_help() {
    let home = TempDir::new().unwrap();
    instadrop(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("room code"))
        .stdout(predicate::str::contains("send"))
        .stdout(predicate::str::contains("receive"))
        .stdout(predicate::str::contains("relay"))
        .stdout(predicate::str::contains("tool"));
}

#[test]
fn test_cli_version() {
    let home = TempDir::new().unwrap();
    instadrop(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("1.0.0"));
}

#[test]
fn test_send_requires_files() {
    let home = TempDir::new().unwrap();
    instadrop(&home)
        .arg("send")
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}

#[test]
fn test_send_missing_file() {
    let home = TempDir::new().unwrap();
    instadrop(&home)
        .args(["send", "nonexistent.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Cannot send nonexistent.txt"));
}

#[test]
fn test_receive_needs_a_room() {
    let home = TempDir::new().unwrap();
    instadrop(&home)
        .arg("receive")
        .assert()
        .failure()
        .stderr(predicate::str::contains("room code or a join link"));
}

#[test]
fn test_receive_rejects_bad_codes() {
    let home = TempDir::new().unwrap();
    instadrop(&home)
        .args(["receive", "12ab"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid room code"));

    instadrop(&home)
        .args(["receive", "--link", "https://drop.example.com/?lang=en"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid join link"));
}

#[test]
fn test_config_commands() {
    let home = TempDir::new().unwrap();
    let out = home.path().join("inbox");

    instadrop(&home)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "http://localhost:3000/tools/instant-drop",
        ))
        .stdout(predicate::str::contains("not set"));

    instadrop(&home)
        .args(["config", "set-output"])
        .arg(&out)
        .assert()
        .success();
    instadrop(&home)
        .args(["config", "set-api", "https://api.example.com/"])
        .assert()
        .success();

    let saved = fs::read_to_string(
        home.path().join("config").join("instadrop").join("config.toml"),
    )
    .unwrap();
    assert!(saved.contains("https://api.example.com\""), "{saved}");

    instadrop(&home)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains(out.display().to_string()))
        .stdout(predicate::str::contains("wss://api.example.com"));

    instadrop(&home)
        .args(["config", "clear-output"])
        .assert()
        .success();
    instadrop(&home)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not set"));
}

#[test]
fn test_config_rejects_bad_urls() {
    let home = TempDir::new().unwrap();
    instadrop(&home)
        .args(["config", "set-api", "ftp://example.com"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid API URL"));
    instadrop(&home)
        .args(["config", "set-join-base", "not a url"])
        .assert()
        .failure();
}

#[test]
fn test_usage_starts_at_quota() {
    let home = TempDir::new().unwrap();
    instadrop(&home)
        .arg("usage")
        .assert()
        .success()
        .stdout(predicate::str::contains("Used: 0"))
        .stdout(predicate::str::contains("Remaining: 5 of 5"));
}

#[test]
fn test_tool_is_gated_by_quota() {
    let home = TempDir::new().unwrap();
    write_config(&home, "free_quota = 0\n");

    instadrop(&home)
        .args(["tool", "compress-pdf", "whatever.pdf"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("free tool runs"));
}

#[test]
fn test_tool_reports_unreadable_input() {
    let home = TempDir::new().unwrap();
    instadrop(&home)
        .args(["tool", "ocr", "missing.png"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read missing.png"));

    // Failed runs are not counted.
    instadrop(&home)
        .arg("usage")
        .assert()
        .success()
        .stdout(predicate::str::contains("Used: 0"));
}

#[test]
fn test_tool_validates_options() {
    let home = TempDir::new().unwrap();
    instadrop(&home)
        .args(["tool", "compress-pdf", "a.pdf", "--quality", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("quality"));
    instadrop(&home)
        .args(["tool", "split", "a.pdf"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--ranges").and(
            predicate::str::contains("required"),
        ));
}

struct KillOnDrop(Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn wait_for_port(port: u16) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while TcpStream::connect(("127.0.0.1", port)).is_err() {
        assert!(Instant::now() < deadline, "relay did not start");
        thread::sleep(Duration::from_millis(50));
    }
}

fn spawn(home: &TempDir, args: &[&str], api_url: &str) -> Child {
    Command::new(env!("CARGO_BIN_EXE_instadrop"))
        .args(args)
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("HOME", home.path())
        .env("INSTADROP_API_URL", api_url)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap()
}

#[test]
fn test_send_and_receive_through_relay() {
    let home = TempDir::new().unwrap();
    let port = free_port();
    let api_url = format!("http://127.0.0.1:{port}");
    let bind = format!("127.0.0.1:{port}");

    let _relay = KillOnDrop(spawn(&home, &["relay", "--bind", &bind], &api_url));
    wait_for_port(port);

    let outbox = home.path().join("outbox");
    fs::create_dir_all(&outbox).unwrap();
    let payload: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
    fs::write(outbox.join("a.bin"), &payload).unwrap();
    fs::write(outbox.join("b.txt"), b"second file").unwrap();

    let mut sender = KillOnDrop(spawn(
        &home,
        &[
            "send",
            outbox.join("a.bin").to_str().unwrap(),
            outbox.join("b.txt").to_str().unwrap(),
        ],
        &api_url,
    ));
    // Keep draining the sender's stdout so it never writes to a closed pipe.
    let stdout = sender.0.stdout.take().unwrap();
    let (code_tx, code_rx) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            if let Some(code) = line.strip_prefix("Room code: ") {
                let _ = code_tx.send(code.trim().to_owned());
            }
        }
    });
    let code = code_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("sender printed no room code");

    let inbox = home.path().join("inbox");
    instadrop(&home)
        .env("INSTADROP_API_URL", &api_url)
        .args(["receive", &code, "--output"])
        .arg(&inbox)
        .timeout(Duration::from_secs(30))
        .assert()
        .success()
        .stdout(predicate::str::contains("All files received successfully"));

    let status = sender.0.wait().unwrap();
    assert!(status.success());

    let session = fs::read_dir(&inbox).unwrap().next().unwrap().unwrap().path();
    assert_eq!(fs::read(session.join("a.bin")).unwrap(), payload);
    assert_eq!(fs::read(session.join("b.txt")).unwrap(), b"second file");
}
