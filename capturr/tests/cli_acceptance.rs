use capturr_core::{CaptureKind, CaptureRecord, Database, SyncStatus};
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_data).expect("failed to create XDG_DATA_HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
        }
    }

    fn db_path(&self) -> PathBuf {
        self.xdg_data.join("capturr/captures.db")
    }

    fn write_config(&self, content: &str) {
        let dir = self.xdg_config.join("capturr");
        fs::create_dir_all(&dir).expect("failed to create config dir");
        fs::write(dir.join("config.toml"), content).expect("failed to write config");
    }

    fn captures(&self) -> Vec<CaptureRecord> {
        let db = Database::open(&self.db_path()).expect("failed to open db");
        db.migrate().expect("failed to migrate db");
        let mut records = db.list_captures(100).expect("failed to list captures");
        records.reverse();
        records
    }
}

fn run_bin(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("capturr"));

    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("failed to execute capturr: {e}"))
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "capturr {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

fn run_ok(env: &CliTestEnv, args: &[&str]) -> String {
    let output = run_bin(env, args);
    assert_success(args, &output);
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn capture_is_queued_and_listed() {
    let env = CliTestEnv::new();

    let stdout = run_ok(&env, &["capture", "Buy", "milk"]);
    assert!(stdout.contains("Queued"), "unexpected output:\n{stdout}");

    let records = env.captures();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].content, "Buy milk");
    assert_eq!(records[0].kind, CaptureKind::Note);
    assert_eq!(records[0].status, SyncStatus::Pending);
    assert_eq!(records[0].attempt_count, 0);

    let history = run_ok(&env, &["history"]);
    assert!(history.contains("Buy milk"));
    assert!(history.contains(&records[0].id.to_string()));

    let status = run_ok(&env, &["status"]);
    assert!(status.contains("Pending:     1"), "unexpected status:\n{status}");
    assert!(env.xdg_data.join("capturr/device-id").exists());
}

#[test]
fn blank_input_captures_nothing() {
    let env = CliTestEnv::new();

    let stdout = run_ok(&env, &["capture", "   "]);
    assert!(stdout.contains("Nothing to capture"));

    let stdout = run_ok(&env, &["voice", " ... "]);
    assert!(stdout.contains("Nothing to capture"));

    assert!(env.captures().is_empty());
}

#[test]
fn todo_creates_one_record_per_line() {
    let env = CliTestEnv::new();

    run_ok(&env, &["todo", "Call mom\n\n  Pay rent  \n"]);

    let records = env.captures();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].content, "Call mom");
    assert_eq!(records[1].content, "Pay rent");
    assert!(records.iter().all(|r| r.kind == CaptureKind::Todo));
}

#[test]
fn share_url_follows_profile_link_format() {
    let env = CliTestEnv::new();

    run_ok(
        &env,
        &["share", "--url", "https://example.com", "--title", "Example"],
    );
    run_ok(&env, &["profile", "set", "--format-links", "true"]);
    run_ok(
        &env,
        &["share", "--url", "https://example.com", "--title", "Example"],
    );
    run_ok(&env, &["share", "  shared words  "]);

    let contents: Vec<String> = env.captures().into_iter().map(|r| r.content).collect();
    assert_eq!(
        contents,
        vec![
            "Example - https://example.com",
            "[Example](https://example.com)",
            "shared words",
        ]
    );
}

#[test]
fn profile_set_and_show_masks_token() {
    let env = CliTestEnv::new();

    let show = run_ok(&env, &["profile", "show"]);
    assert!(show.contains("Sync is idle"));
    assert!(show.contains("Daily notes:  true"));

    run_ok(
        &env,
        &[
            "profile",
            "set",
            "--graph",
            "notes",
            "--token",
            "abcdef1234",
            "--tag",
            "#inbox",
        ],
    );

    let show = run_ok(&env, &["profile", "show"]);
    assert!(show.contains("Graph:        notes"), "unexpected output:\n{show}");
    assert!(show.contains("****1234"));
    assert!(!show.contains("abcdef1234"));
    assert!(show.contains("Tag:          #inbox"));
    assert!(!show.contains("Sync is idle"));

    run_ok(&env, &["profile", "set", "--tag", ""]);
    let show = run_ok(&env, &["profile", "show"]);
    assert!(show.contains("Tag:          -"));
}

#[test]
fn delete_removes_capture() {
    let env = CliTestEnv::new();

    run_ok(&env, &["capture", "Mistake"]);
    let id = env.captures()[0].id.to_string();

    let stdout = run_ok(&env, &["delete", &id]);
    assert!(stdout.contains("Deleted"));
    assert!(env.captures().is_empty());

    let output = run_bin(&env, &["delete", &id]);
    assert!(!output.status.success());

    let output = run_bin(&env, &["delete", "not-a-uuid"]);
    assert!(!output.status.success());
}

#[test]
fn sync_without_profile_leaves_queue_untouched() {
    let env = CliTestEnv::new();

    run_ok(&env, &["capture", "Waiting"]);
    let stdout = run_ok(&env, &["sync"]);
    assert!(stdout.contains("Profile not configured"));

    let records = env.captures();
    assert_eq!(records[0].status, SyncStatus::Pending);
    assert_eq!(records[0].attempt_count, 0);
}

#[test]
fn send_to_unreachable_api_keeps_capture_pending() {
    let env = CliTestEnv::new();

    // Bind then drop to get a port nothing listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("failed to bind");
    let base_url = format!("http://{}", listener.local_addr().expect("no local addr"));
    drop(listener);

    env.write_config(&format!(
        "[sync]\napi_base_url = \"{base_url}\"\nrequest_timeout_secs = 2\n"
    ));
    run_ok(
        &env,
        &["profile", "set", "--graph", "notes", "--token", "secret"],
    );

    run_ok(&env, &["capture", "--send", "Offline", "thought"]);

    let records = env.captures();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, SyncStatus::Pending);
    assert_eq!(records[0].attempt_count, 1);
    assert!(!records[0].hard_error);
    assert!(records[0].next_attempt_at.is_some());
    assert!(records[0]
        .last_error
        .as_deref()
        .unwrap_or_default()
        .starts_with("HTTP request failed"));
}

#[test]
fn invalid_config_is_rejected() {
    let env = CliTestEnv::new();
    env.write_config("[sync]\nmax_concurrent_sends = 0\n");

    let output = run_bin(&env, &["status"]);
    assert!(!output.status.success());
}
