// tests/config_loading.rs
//
// Config files on disk: parsing, defaults, validation failures.

use std::io::Write;
use std::time::Duration;

use flowdag::config::{load_and_validate, load_from_path};
use flowdag_test_utils::init_tracing;

fn write_config(body: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(body.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn full_config_parses_with_defaults_filled_in() {
    init_tracing();
    let file = write_config(
        r#"
        [coordinator]
        max_parallel = 2
        backoff_base_ms = 250

        [worker.builder]
        capabilities = ["shell", "docker"]

        [task.fetch]
        cmd = "curl -O https://example.com/data.tar"

        [task.build]
        type = "docker"
        after = ["fetch"]
        priority = 5
        max_attempts = 5
        timeout_secs = 30
        payload = { image = "builder:latest" }
        "#,
    );

    let cfg = load_and_validate(file.path()).unwrap();
    assert_eq!(cfg.coordinator.max_parallel, 2);
    // Untouched knobs keep their defaults.
    assert_eq!(cfg.coordinator.default_max_attempts, 3);
    assert_eq!(cfg.coordinator.checkpoint_dir, ".flowdag");

    let specs = cfg.task_specs();
    let build = specs.iter().find(|s| s.name == "build").unwrap();
    assert_eq!(build.task_type, "docker");
    assert_eq!(build.after, vec!["fetch"]);
    assert_eq!(build.priority, 5);
    assert_eq!(build.max_attempts, 5);
    assert_eq!(build.timeout, Duration::from_secs(30));
    assert_eq!(build.payload["image"], "builder:latest");

    // `cmd` shorthand becomes a shell payload with default budget.
    let fetch = specs.iter().find(|s| s.name == "fetch").unwrap();
    assert_eq!(fetch.task_type, "shell");
    assert_eq!(fetch.max_attempts, 3);
    assert_eq!(fetch.timeout, Duration::from_secs(300));
    assert!(fetch.payload["cmd"].as_str().unwrap().starts_with("curl"));
}

#[test]
fn missing_file_reports_the_path() {
    init_tracing();
    let err = load_from_path("/definitely/not/here/Flowdag.toml").unwrap_err();
    assert!(err.to_string().contains("Flowdag.toml"));
}

#[test]
fn dependency_cycle_in_file_is_rejected() {
    init_tracing();
    let file = write_config(
        r#"
        [task.a]
        cmd = "a"
        after = ["b"]

        [task.b]
        cmd = "b"
        after = ["a"]
        "#,
    );
    assert!(load_and_validate(file.path()).is_err());
}

#[test]
fn unknown_dependency_in_file_is_rejected() {
    init_tracing();
    let file = write_config(
        r#"
        [task.deploy]
        cmd = "deploy.sh"
        after = ["ghost"]
        "#,
    );
    let err = load_and_validate(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("ghost"));
}

#[test]
fn malformed_toml_is_a_parse_error_not_a_panic() {
    init_tracing();
    let file = write_config("[task.a\ncmd = ");
    assert!(load_from_path(file.path()).is_err());
}
