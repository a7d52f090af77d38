use super::{
    apply_env_settings, apply_file_settings, normalize_database_url, prepare_database_url,
    Settings,
};

use std::{
    collections::HashMap,
    env, fs,
    time::{SystemTime, UNIX_EPOCH},
};

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(
        normalize_database_url("./data/test.db"),
        "sqlite://./data/test.db"
    );
}

#[test]
fn blank_database_url_falls_back_to_default() {
    assert_eq!(
        normalize_database_url("   "),
        Settings::default().database_url
    );
}

#[test]
fn creates_parent_dir_for_relative_sqlite_url() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();

    let temp_root = env::temp_dir().join(format!("thumbnail_server_test_{suffix}"));
    let db_path = temp_root.join("data").join("test.db");

    prepare_database_url(db_path.to_string_lossy().as_ref()).expect("prepare db url");
    assert!(temp_root.join("data").exists());

    fs::remove_dir_all(temp_root).expect("cleanup");
}

#[test]
fn env_overrides_defaults_and_prefixed_keys_win() {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("SERVER_BIND", "0.0.0.0:1"),
        ("APP__BIND_ADDR", "0.0.0.0:2"),
        ("GEMINI_API_KEY", "secret"),
        ("APP__STARTING_CREDITS", "5"),
        ("APP__REFERRAL_BONUS", "not-a-number"),
    ]);
    let mut settings = Settings::default();
    apply_env_settings(&mut settings, |key| vars.get(key).map(|v| v.to_string()));

    assert_eq!(settings.server_bind, "0.0.0.0:2");
    assert_eq!(settings.gemini_api_key.as_deref(), Some("secret"));
    assert_eq!(settings.starting_credits, 5);
    assert_eq!(settings.referral_bonus, 10);
}

#[test]
fn blank_api_key_env_is_ignored() {
    let mut settings = Settings::default();
    apply_env_settings(&mut settings, |key| {
        (key == "GEMINI_API_KEY").then(|| "  ".to_string())
    });
    assert!(settings.gemini_api_key.is_none());
}

#[test]
fn file_settings_apply_known_keys() {
    let file_cfg = HashMap::from([
        ("bind_addr".to_string(), "127.0.0.1:9999".to_string()),
        ("gemini_model".to_string(), "other-model".to_string()),
        ("max_body_bytes".to_string(), "1024".to_string()),
    ]);
    let mut settings = Settings::default();
    apply_file_settings(&mut settings, &file_cfg);

    assert_eq!(settings.server_bind, "127.0.0.1:9999");
    assert_eq!(settings.gemini_model, "other-model");
    assert_eq!(settings.max_body_bytes, 1024);
}

#[tokio::test]
async fn prepared_database_url_creates_openable_sqlite_file() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();

    let temp_root = env::temp_dir().join(format!("thumbnail_server_open_test_{suffix}"));
    let db_path = temp_root.join("nested").join("server.db");

    let prepared = prepare_database_url(db_path.to_string_lossy().as_ref()).expect("prepare");
    let storage = storage::Storage::new(&prepared).await.expect("open sqlite");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should be created: {}",
        db_path.display()
    );

    fs::remove_dir_all(temp_root).expect("cleanup");
}
