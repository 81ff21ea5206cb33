use chrono::{Duration, Utc};
use fanpulse_core::ingest::SongPlay;
use fanpulse_core::taxonomy::Context;
use fanpulse_core::{ContentType, Database, EventIngest, SessionTracker};
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use std::sync::Arc;
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
        self.xdg_data.join("fanpulse/data.db")
    }

    fn open_db(&self) -> Arc<Database> {
        let db = Database::open(&self.db_path()).expect("failed to open db");
        db.migrate().expect("failed to migrate db");
        Arc::new(db)
    }

    fn write_config(&self, contents: &str) {
        let dir = self.xdg_config.join("fanpulse");
        fs::create_dir_all(&dir).expect("failed to create config dir");
        fs::write(dir.join("config.toml"), contents).expect("failed to write config");
    }
}

fn run_bin(env: &CliTestEnv, bin_name: &str, args: &[&str]) -> Output {
    let bin_path = match bin_name {
        "fanpulse-analyze" => PathBuf::from(assert_cmd::cargo::cargo_bin!("fanpulse-analyze")),
        "fanpulse-sweep" => PathBuf::from(assert_cmd::cargo::cargo_bin!("fanpulse-sweep")),
        _ => panic!("unsupported binary in test harness: {bin_name}"),
    };

    let mut command = Command::new(bin_path);

    command
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .output()
        .unwrap_or_else(|e| panic!("failed to execute {bin_name}: {e}"))
}

fn assert_success(bin_name: &str, args: &[&str], output: &Output) {
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
        "{bin_name} {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

fn parse_json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout)
        .unwrap_or_else(|e| panic!("expected JSON on stdout ({e}), got:\n{stdout}"))
}

fn seed_plays(db: Arc<Database>, user_id: &str, song_id: &str, count: usize) {
    let ingest = EventIngest::new(db);
    for _ in 0..count {
        let outcome = ingest.track_song_play(&SongPlay {
            user_id: user_id.to_string(),
            song_id: song_id.to_string(),
            artist_id: "A1".to_string(),
            context: Context::Player,
            genre: Some("highlife".to_string()),
            duration_secs: Some(180.0),
        });
        assert!(outcome.is_recorded());
    }
}

#[test]
fn analyze_platform_on_empty_database_prints_zeroed_json() {
    let env = CliTestEnv::new();
    let args = ["platform", "--format", "json"];

    let output = run_bin(&env, "fanpulse-analyze", &args);
    assert_success("fanpulse-analyze", &args, &output);

    let db_path = env.db_path();
    assert!(
        db_path.exists(),
        "database file should exist at {}",
        db_path.display()
    );

    let json = parse_json(&output);
    assert_eq!(json["days"], 30);
    assert_eq!(json["totalSignups"], 0);
    assert_eq!(json["growthTrend"].as_array().map(Vec::len), Some(30));
}

#[test]
fn analyze_user_reports_seeded_plays() {
    let env = CliTestEnv::new();
    seed_plays(env.open_db(), "fan-1", "S1", 3);

    let args = ["user", "fan-1", "--days", "7", "--format", "json"];
    let output = run_bin(&env, "fanpulse-analyze", &args);
    assert_success("fanpulse-analyze", &args, &output);

    let json = parse_json(&output);
    assert_eq!(json["userId"], "fan-1");
    assert_eq!(json["days"], 7);
    assert_eq!(json["totalPlays"], 3);
    assert_eq!(json["favoriteGenres"][0]["genre"], "highlife");
}

#[test]
fn analyze_unknown_user_fails_with_message() {
    let env = CliTestEnv::new();

    let output = run_bin(&env, "fanpulse-analyze", &["user", "ghost"]);
    assert!(!output.status.success(), "unknown user should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("ghost"),
        "expected user id in error output, got:\n{stderr}"
    );
}

#[test]
fn analyze_trending_refresh_writes_ranks() {
    let env = CliTestEnv::new();
    let db = env.open_db();
    seed_plays(db.clone(), "fan-1", "S1", 2);
    seed_plays(db.clone(), "fan-2", "S2", 1);

    let args = ["trending", "--refresh"];
    let output = run_bin(&env, "fanpulse-analyze", &args);
    assert_success("fanpulse-analyze", &args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("Refreshed 2 trending rank(s)"),
        "expected refresh summary, got:\n{stdout}"
    );

    let perf = db
        .get_content_performance("S1", ContentType::Song)
        .expect("query content performance")
        .expect("S1 should have a snapshot");
    assert_eq!(perf.trending.rank, Some(1));
}

#[test]
fn sweep_closes_only_idle_sessions() {
    let env = CliTestEnv::new();
    let db = env.open_db();
    let tracker = SessionTracker::new(db.clone());

    let stale = tracker
        .start_at("fan-1", None, None, Utc::now() - Duration::hours(2))
        .expect("stale session");
    let fresh = tracker.start("fan-2", None, None).expect("fresh session");

    let output = run_bin(&env, "fanpulse-sweep", &[]);
    assert_success("fanpulse-sweep", &[], &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("Closed 1 idle session(s)"),
        "expected sweep summary, got:\n{stdout}"
    );

    let stale = db.get_session(&stale).unwrap().unwrap();
    assert!(!stale.is_active);
    assert_eq!(stale.ended_at, Some(stale.last_activity_at));
    assert!(db.get_session(&fresh).unwrap().unwrap().is_active);
}

#[test]
fn sweep_honors_configured_idle_timeout() {
    let env = CliTestEnv::new();
    env.write_config("[sessions]\nidle_timeout_minutes = 600\n");

    let db = env.open_db();
    let tracker = SessionTracker::new(db.clone());
    let id = tracker
        .start_at("fan-1", None, None, Utc::now() - Duration::hours(2))
        .expect("session");

    let output = run_bin(&env, "fanpulse-sweep", &[]);
    assert_success("fanpulse-sweep", &[], &output);
    assert!(String::from_utf8_lossy(&output.stdout).contains("Closed 0 idle session(s)"));
    assert!(db.get_session(&id).unwrap().unwrap().is_active);

    let args = ["--idle-minutes", "30"];
    let output = run_bin(&env, "fanpulse-sweep", &args);
    assert_success("fanpulse-sweep", &args, &output);
    assert!(String::from_utf8_lossy(&output.stdout).contains("Closed 1 idle session(s)"));
}
