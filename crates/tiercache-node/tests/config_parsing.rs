use std::{env, fs, time::Duration};

use tiercache_node::CachePolicy;
use tiercache_node::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("tiercache.toml");

    let toml_content = r#"
[redis]
enabled = true
url = "redis://cache.internal:6380"
pool_size = 4

[cache]
entity = "account"
schema_version = "v2"
logical_ttl_base_secs = 60
logical_ttl_jitter_secs = 30
physical_ttl_secs = 120
negative_ttl_secs = 10
double_delete_delay_ms = 500

[filter]
expected_items = 1000
false_positive_rate = 0.001

[logging]
level = "debug"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses; unspecified fields keep their defaults
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert!(cfg.redis.enabled);
    assert_eq!(cfg.redis.pool_size, 4);
    assert_eq!(cfg.redis.timeout_ms, 5000);
    assert_eq!(cfg.cache.entity, "account");
    assert_eq!(cfg.cache.load_lock_ttl_ms, 5000);
    assert_eq!(cfg.filter.expected_items, 1000);
    assert_eq!(cfg.logging.level, "debug");

    let policy = CachePolicy::from(&cfg.cache);
    assert_eq!(policy.logical_ttl_base, Duration::from_secs(60));
    assert_eq!(policy.logical_ttl_jitter, Duration::from_secs(30));
    assert_eq!(policy.double_delete_delay, Duration::from_millis(500));

    // 2) Env override should win over file
    unsafe {
        env::set_var("TIERCACHE__CACHE__NEGATIVE_TTL_SECS", "45");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.cache.negative_ttl_secs, 45);
    unsafe {
        env::remove_var("TIERCACHE__CACHE__NEGATIVE_TTL_SECS");
    }

    // 3) Physical TTL shorter than the logical window is rejected
    let invalid_path = dir.path().join("invalid.toml");
    let invalid_toml = r#"
[cache]
logical_ttl_base_secs = 300
logical_ttl_jitter_secs = 300
physical_ttl_secs = 400
"#;
    fs::write(&invalid_path, invalid_toml).expect("write invalid toml");
    let err = load_config(invalid_path.to_str()).expect_err("expected validation error");
    assert!(err.contains("physical_ttl_secs must be >="));
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("absent.toml");

    let cfg = load_config(path.to_str()).expect("defaults should load");
    assert!(!cfg.redis.enabled);
    assert_eq!(cfg.cache.entity, "user");
    assert_eq!(cfg.cache.schema_version, "v1");
    assert_eq!(cfg.filter.expected_items, 10_000_000);
    assert_eq!(cfg.cache.physical_ttl_secs, 600);
}
