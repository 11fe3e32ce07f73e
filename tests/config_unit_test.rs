//! Unit tests for YAML configuration loading

use dump_stager::config::StagerConfig;
use dump_stager::error::StagerError;
use dump_stager::rewriter::{ConstraintScope, TypeGuard};
use tempfile::TempDir;

#[test]
fn test_load_full_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("stager.yaml");
    std::fs::write(
        &path,
        r#"
batches: 12
header: true
retained_settings:
  - search_path
  - Check_Function_Bodies
type_guard: catalog
constraint_scope: global
"#,
    )
    .unwrap();

    let config = StagerConfig::load(&path).unwrap();
    assert_eq!(config.batches, 12);
    assert!(config.header);
    assert_eq!(config.type_guard, TypeGuard::Catalog);
    assert_eq!(config.constraint_scope, ConstraintScope::Global);

    let options = config.rewrite_options();
    assert_eq!(
        options.retained_settings,
        vec!["search_path", "check_function_bodies"]
    );
}

#[test]
fn test_missing_keys_use_defaults() {
    let config = StagerConfig::from_yaml("header: true\n").unwrap();
    assert_eq!(config.batches, 10);
    assert_eq!(config.retained_settings, vec!["search_path"]);
    assert_eq!(config.type_guard, TypeGuard::Keyword);
    assert_eq!(config.constraint_scope, ConstraintScope::Table);
}

#[test]
fn test_empty_retained_settings_drops_every_set() {
    let config = StagerConfig::from_yaml("retained_settings: []\n").unwrap();
    assert!(config.rewrite_options().retained_settings.is_empty());
}

#[test]
fn test_load_missing_file() {
    let temp_dir = TempDir::new().unwrap();
    let err = StagerConfig::load(&temp_dir.path().join("nope.yaml")).unwrap_err();
    assert!(matches!(err, StagerError::Io { .. }));
}

#[test]
fn test_load_invalid_file_names_path() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("bad.yaml");
    std::fs::write(&path, "type_guard: always\n").unwrap();

    let err = StagerConfig::load(&path).unwrap_err();
    assert!(matches!(err, StagerError::Config { .. }));
    assert!(err.to_string().contains("bad.yaml"));
}

#[test]
fn test_load_or_default() {
    assert_eq!(
        StagerConfig::load_or_default(None).unwrap(),
        StagerConfig::default()
    );
}
