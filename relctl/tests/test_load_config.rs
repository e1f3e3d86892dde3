use relctl_core::config::Channel;
use relctl_core::version::OlmType;
use serial_test::serial;
use std::fs::write;
use tempfile::NamedTempFile;

/// A full addon entry loads, and omitted sections fall back to defaults.
#[tokio::test]
#[serial]
async fn test_load_config_addon_with_defaults() {
    let config_yaml = r#"
addons:
  - name: rhoams
    operator_name: managed-api-service
    olm_type: managed-api-service
    bundle:
      repo: https://github.com/integr8ly/integreatly-operator.git
      path: bundles/managed-api-service
    channels:
      - name: stage
        directory: managed-api-service
        environment: staging
      - name: stable
        directory: rhoams
        environment: production
    override:
      deployment:
        name: rhmi-operator
        container:
          name: rhmi-operator
"#;
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), config_yaml).unwrap();

    let config = relctl::load_config::load_config(config_file.path()).expect("Config should load");

    let addon = config.addon("rhoams").expect("addon is configured");
    assert_eq!(addon.operator(), "managed-api-service");
    assert_eq!(addon.olm_type, OlmType::ManagedApiService);
    assert_eq!(addon.channels.len(), 2);
    assert_eq!(
        addon.channel(Channel::Stable).map(|c| c.directory.as_str()),
        Some("rhoams")
    );
    assert!(addon.channel(Channel::Edge).is_none());
    assert_eq!(
        addon
            .override_env
            .as_ref()
            .map(|o| o.deployment.container.name.as_str()),
        Some("rhmi-operator")
    );

    assert_eq!(config.author.name, "Delorean");
    assert_eq!(config.operator_container, "operator");
    assert_eq!(
        config.baselines_for("keycloak-operator"),
        vec!["keycloak-operator.v18.0.0", "keycloak-operator.v9.0.3"]
    );
}

/// Explicit baselines replace the built-in list.
#[tokio::test]
#[serial]
async fn test_load_config_overrides_baselines() {
    let config_yaml = r#"
baselines:
  rhoam:
    - rhoam.v1.0.5
"#;
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), config_yaml).unwrap();

    let config = relctl::load_config::load_config(config_file.path()).expect("Config should load");

    assert!(config.addons.is_empty());
    assert_eq!(config.baselines_for("rhoam"), vec!["rhoam.v1.0.5"]);
    assert!(!config.baselines.contains_key("keycloak-operator"));
}

#[tokio::test]
#[serial]
async fn test_load_config_missing_file_names_path() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("addons.yaml");

    let err = relctl::load_config::load_config(&missing).expect_err("missing file must fail");
    let msg = err.to_string();
    assert!(msg.contains("Failed to read config file"), "got: {msg}");
    assert!(msg.contains("addons.yaml"), "got: {msg}");
}

#[tokio::test]
#[serial]
async fn test_load_config_invalid_yaml() {
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), "addons:\n  - name: [unterminated\n").unwrap();

    let err = relctl::load_config::load_config(config_file.path()).expect_err("bad YAML must fail");
    assert!(
        err.to_string().contains("Failed to parse config YAML"),
        "got: {err}"
    );
}
