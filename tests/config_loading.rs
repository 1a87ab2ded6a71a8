use std::io::Write;

use meshflow_core::config::AppConfig;
use meshflow_core::MeshflowError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[engine]
dedupe_visits = true

[simulation]
default_model = "claude"
tokens_per_call = 200
cost_per_1k_tokens = 0.01
node_latency_ms = 5
agent_latency_ms = 10
seed = 42

[scheduler]
default_step_timeout_ms = 5000

[log]
filter = "meshflow=debug"
dir = "/tmp/meshflow-logs"
level = 3
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert!(config.engine.dedupe_visits);
    assert_eq!(config.simulation.default_model, "claude");
    assert_eq!(config.simulation.tokens_per_call, 200);
    assert_eq!(config.simulation.seed, Some(42));
    assert_eq!(config.simulation.agent_latency_ms, 10);
    assert_eq!(config.scheduler.default_step_timeout_ms, 5000);
    assert_eq!(config.log.filter, "meshflow=debug");
    assert_eq!(config.log.level, 3);
    assert_eq!(
        config.log.log_dir().unwrap().to_str(),
        Some("/tmp/meshflow-logs")
    );
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("MESHFLOW_TEST_MODEL", "expanded-model");

    let toml_content = r#"
[simulation]
default_model = "${MESHFLOW_TEST_MODEL}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.simulation.default_model, "expanded-model");

    std::env::remove_var("MESHFLOW_TEST_MODEL");
}

#[test]
fn test_empty_config_uses_defaults() {
    let tmp = tempfile::NamedTempFile::new().expect("create temp file");
    let config = AppConfig::load(tmp.path()).expect("load config");

    assert!(!config.engine.dedupe_visits);
    assert_eq!(config.simulation.default_model, "gpt-4");
    assert_eq!(config.simulation.tokens_per_call, 150);
    assert_eq!(config.simulation.agent_latency_ms, 50);
    assert!(config.simulation.seed.is_none());
    assert_eq!(config.scheduler.default_step_timeout_ms, 30_000);
    assert_eq!(config.log.filter, "meshflow=info,warn");
    assert_eq!(config.log.level, 2);
    assert!(config.log.dir.is_none());
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("absent.toml");

    let err = AppConfig::load(&path).unwrap_err();
    assert!(matches!(err, MeshflowError::ConfigNotFound(_)));

    let config = AppConfig::load_or_default(&path).expect("defaults");
    assert_eq!(config.scheduler.default_step_timeout_ms, 30_000);
}

#[test]
fn test_invalid_toml_is_config_error() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[engine\ndedupe_visits = ").expect("write toml");

    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, MeshflowError::Config(_)));
}
