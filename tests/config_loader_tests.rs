use flow_monitor::config::{
    ConfigError, ConfigLoader, SnapshotPolicy, SnapshotStrategy, StoreMode,
};
use std::{
    env, fs,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    let keys: Vec<String> = env::vars()
        .map(|(key, _)| key)
        .filter(|key| key.starts_with("FLOWMON_"))
        .collect();
    unsafe {
        for key in keys {
            env::remove_var(key);
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

/// A loader isolated from the working directory and `/run/secrets`.
fn loader(env_dir: &TempDir, secrets_dir: &TempDir) -> ConfigLoader {
    ConfigLoader::with_base_dir(env_dir.path().to_path_buf())
        .with_secrets_dir(secrets_dir.path().to_path_buf())
}

#[test]
fn loads_defaults_when_no_env_present() {
    let _guard = env_guard();
    clear_env();

    let env_dir = TempDir::new().unwrap();
    let secrets = TempDir::new().unwrap();
    let cfg = loader(&env_dir, &secrets)
        .load()
        .expect("config loads with defaults");

    assert_eq!(cfg.profile, "dev");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.monitor.mode, StoreMode::Local);
    assert_eq!(cfg.monitor.base_path(), "/monitor");
    assert_eq!(cfg.monitor.snapshot_recording, SnapshotPolicy::All);
    assert_eq!(cfg.monitor.snapshot_strategy, SnapshotStrategy::Collection);
    assert!(cfg.monitor.uses_default_username());
    assert!(cfg.monitor.uses_default_password());
    assert_eq!(cfg.admin.public_url, "http://localhost:8080");
    cfg.bind_addr().expect("default bind addr parses");
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let env_dir = TempDir::new().unwrap();
    let secrets = TempDir::new().unwrap();
    write_env_file(&env_dir, ".env", "FLOWMON_API_BIND_ADDR=127.0.0.1:3000\n");
    write_env_file(
        &env_dir,
        ".env.local",
        "FLOWMON_PROFILE=staging\nFLOWMON_API_BIND_ADDR=127.0.0.1:4000\nFLOWMON_MONITOR_SNAPSHOT_RECORDING=first_and_last\n",
    );
    write_env_file(
        &env_dir,
        ".env.staging",
        "FLOWMON_API_BIND_ADDR=192.168.0.10:5000\nFLOWMON_MONITOR_HTTP_PATH=/cpro/monitor/\n",
    );
    write_env_file(
        &env_dir,
        ".env.staging.local",
        "FLOWMON_API_BIND_ADDR=10.0.0.5:1880\n",
    );

    let cfg = loader(&env_dir, &secrets).load().unwrap();
    assert_eq!(cfg.profile, "staging");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:1880");
    assert_eq!(cfg.admin.public_url, "http://localhost:1880");
    assert_eq!(cfg.monitor.base_path(), "/cpro/monitor");
    assert_eq!(cfg.monitor.snapshot_recording, SnapshotPolicy::FirstAndLast);
}

#[test]
fn process_env_overrides_files() {
    let _guard = env_guard();
    clear_env();

    let env_dir = TempDir::new().unwrap();
    let secrets = TempDir::new().unwrap();
    write_env_file(
        &env_dir,
        ".env",
        "FLOWMON_MONITOR_MODE=local\nFLOWMON_MONITOR_IGNORE=inject, catch ,,status\n",
    );
    unsafe {
        env::set_var("FLOWMON_MONITOR_MODE", "remote");
        env::set_var("FLOWMON_MONITOR_API_URL", "http://monitor.internal:8080/monitor");
    }

    let cfg = loader(&env_dir, &secrets).load().unwrap();
    assert_eq!(cfg.monitor.mode, StoreMode::Remote);
    assert_eq!(
        cfg.monitor.api_url.as_deref(),
        Some("http://monitor.internal:8080/monitor")
    );
    assert_eq!(cfg.monitor.ignore, vec!["inject", "catch", "status"]);
    clear_env();
}

#[test]
fn secret_files_take_precedence_over_env() {
    let _guard = env_guard();
    clear_env();

    let env_dir = TempDir::new().unwrap();
    let secrets = TempDir::new().unwrap();
    write_env_file(
        &env_dir,
        ".env",
        "FLOWMON_MONITOR_DB_USERNAME=from-env\nFLOWMON_MONITOR_DB_PASSWORD=from-env\n",
    );
    fs::write(secrets.path().join("MONITOR_DB_PASSWORD"), "from-secret\n").unwrap();
    fs::write(secrets.path().join("ADMIN_PASSWORD"), "admin-secret").unwrap();

    let cfg = loader(&env_dir, &secrets).load().unwrap();
    assert_eq!(cfg.monitor.db_username, "from-env");
    assert_eq!(cfg.monitor.db_password, "from-secret");
    assert_eq!(cfg.admin.password, "admin-secret");
    assert!(!cfg.monitor.uses_default_password());

    let redacted = cfg.redacted_json().unwrap();
    assert!(!redacted.contains("from-secret"));
    assert!(!redacted.contains("admin-secret"));
}

#[test]
fn invalid_values_are_rejected() {
    let _guard = env_guard();
    clear_env();

    let env_dir = TempDir::new().unwrap();
    let secrets = TempDir::new().unwrap();

    write_env_file(&env_dir, ".env", "FLOWMON_MONITOR_MODE=mongo\n");
    assert!(matches!(
        loader(&env_dir, &secrets).load(),
        Err(ConfigError::InvalidStoreMode { .. })
    ));

    write_env_file(&env_dir, ".env", "FLOWMON_MONITOR_MODE=remote\n");
    assert!(matches!(
        loader(&env_dir, &secrets).load(),
        Err(ConfigError::MissingMonitorApiUrl)
    ));

    write_env_file(&env_dir, ".env", "FLOWMON_MONITOR_WORKERS=many\n");
    assert!(matches!(
        loader(&env_dir, &secrets).load(),
        Err(ConfigError::InvalidNumber { key: "MONITOR_WORKERS", .. })
    ));

    write_env_file(&env_dir, ".env", "FLOWMON_PROFILE=production\n");
    assert!(matches!(
        loader(&env_dir, &secrets).load(),
        Err(ConfigError::InvalidProfile { .. })
    ));
}
