use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use envdeck_core::EnvironmentRecord;

use crate::{backup_environment, EnvironmentRegistry, RegistryError};

#[test]
fn load_of_missing_file_is_empty_without_issue() {
    let root = test_root("missing");
    let (registry, issue) = EnvironmentRegistry::load(root.join("environments.json"));
    assert!(registry.records().is_empty());
    assert!(issue.is_none());
    assert!(!root.exists(), "loading must not create anything");
}

#[test]
fn added_records_survive_a_fresh_load_in_order() {
    let root = test_root("roundtrip");
    let path = root.join("environments.json");
    let mut registry = EnvironmentRegistry::empty(&path);
    registry
        .add(record("web", "/srv/envs/web"))
        .expect("must add");
    registry
        .add(record("api", "/srv/envs/api"))
        .expect("must add");

    let (reloaded, issue) = EnvironmentRegistry::load(&path);
    assert!(issue.is_none());
    assert_eq!(reloaded.records(), registry.records());
    let names: Vec<&str> = reloaded
        .records()
        .iter()
        .map(|record| record.name.as_str())
        .collect();
    assert_eq!(names, vec!["web", "api"]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn persisted_file_uses_python_version_key_and_leaves_no_staging_file() {
    let root = test_root("format");
    let path = root.join("environments.json");
    let mut registry = EnvironmentRegistry::empty(&path);
    registry
        .add(record("web", "/srv/envs/web"))
        .expect("must add");

    let content = fs::read_to_string(&path).expect("must read registry");
    let value: serde_json::Value = serde_json::from_str(&content).expect("must be json");
    assert_eq!(value[0]["name"], "web");
    assert_eq!(value[0]["path"], "/srv/envs/web");
    assert_eq!(value[0]["python_version"], "Python 3.11.7");
    assert!(!root.join("environments.json.tmp").exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn duplicate_path_is_rejected_and_registry_is_unchanged() {
    let root = test_root("duplicate");
    let path = root.join("environments.json");
    let mut registry = EnvironmentRegistry::empty(&path);
    registry
        .add(record("web", "/srv/envs/web"))
        .expect("must add");
    let before = fs::read_to_string(&path).expect("must read registry");

    let err = registry
        .add(record("other-name", "/srv/envs/web"))
        .expect_err("must reject duplicate path");
    assert!(matches!(err, RegistryError::DuplicatePath { .. }));
    assert!(err.to_string().contains("/srv/envs/web"));

    assert_eq!(registry.records().len(), 1);
    assert_eq!(fs::read_to_string(&path).expect("must read"), before);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn remove_of_unknown_path_is_a_no_op() {
    let root = test_root("remove-missing");
    let path = root.join("environments.json");
    let mut registry = EnvironmentRegistry::empty(&path);

    let removed = registry
        .remove(Path::new("/nowhere"))
        .expect("must succeed");
    assert!(removed.is_none());
    assert!(!path.exists());
}

#[test]
fn remove_persists_and_keeps_environment_files() {
    let root = test_root("remove");
    let env_dir = root.join("envs").join("web");
    fs::create_dir_all(&env_dir).expect("must create env dir");
    let path = root.join("environments.json");
    let mut registry = EnvironmentRegistry::empty(&path);
    registry
        .add(record("web", env_dir.to_str().expect("utf8 path")))
        .expect("must add");
    registry
        .add(record("api", "/srv/envs/api"))
        .expect("must add");

    let removed = registry.remove(&env_dir).expect("must remove");
    assert_eq!(removed.map(|record| record.name), Some("web".to_string()));
    assert!(env_dir.is_dir(), "removal must never delete files");

    let (reloaded, _) = EnvironmentRegistry::load(&path);
    assert_eq!(reloaded.records().len(), 1);
    assert_eq!(reloaded.records()[0].name, "api");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn find_and_resolve_report_not_found() {
    let root = test_root("find");
    let mut registry = EnvironmentRegistry::empty(root.join("environments.json"));
    registry
        .add(record("web", "/srv/envs/web"))
        .expect("must add");

    assert_eq!(
        registry
            .find(Path::new("/srv/envs/web"))
            .expect("must find")
            .name,
        "web"
    );
    assert_eq!(
        registry.resolve("web").expect("must resolve by name").path,
        PathBuf::from("/srv/envs/web")
    );
    assert_eq!(
        registry
            .resolve("/srv/envs/web")
            .expect("must resolve by path")
            .name,
        "web"
    );

    let err = registry
        .find(Path::new("/srv/envs/api"))
        .expect_err("must not find");
    assert!(matches!(err, RegistryError::NotFound { .. }));
    assert!(registry.resolve("api").is_err());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn corrupt_registry_is_quarantined_and_reported() {
    let root = test_root("corrupt");
    fs::create_dir_all(&root).expect("must create root");
    let path = root.join("environments.json");
    fs::write(&path, "{ not json").expect("must write corrupt file");

    let (registry, issue) = EnvironmentRegistry::load(&path);
    assert!(registry.records().is_empty());
    let issue = issue.expect("corruption must be reported");
    assert!(issue.reason.contains("failed parsing registry"));

    let quarantined = issue.quarantined_to.expect("file must be moved aside");
    assert!(!path.exists());
    assert_eq!(
        fs::read_to_string(&quarantined).expect("must keep original bytes"),
        "{ not json"
    );
    assert!(quarantined
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("environments.json.corrupt-")));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn backup_environment_copies_into_timestamped_container() {
    let root = test_root("backup");
    let env_dir = root.join("web");
    fs::create_dir_all(env_dir.join("lib")).expect("must create env");
    fs::write(env_dir.join("pyvenv.cfg"), "home = /usr/bin\n").expect("must write cfg");
    fs::write(env_dir.join("lib").join("site.py"), "x = 1\n").expect("must write module");
    let destination = root.join("backups");

    let copied = backup_environment(&env_dir, "web", &destination).expect("must back up");

    assert_eq!(copied.file_name().and_then(|name| name.to_str()), Some("web"));
    let container = copied.parent().expect("container");
    let container_name = container
        .file_name()
        .and_then(|name| name.to_str())
        .expect("container name");
    assert!(container_name.starts_with("web_backup_"), "{container_name}");
    assert_eq!(container_name.len(), "web_backup_".len() + "20240101_120000".len());
    assert_eq!(
        fs::read_to_string(copied.join("lib").join("site.py")).expect("must read copy"),
        "x = 1\n"
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn backup_of_missing_environment_leaves_no_partial_container() {
    let root = test_root("backup-missing");
    let destination = root.join("backups");
    fs::create_dir_all(&destination).expect("must create destination");

    let err = backup_environment(&root.join("absent"), "absent", &destination)
        .expect_err("must fail");
    assert!(matches!(err, RegistryError::Backup { .. }));
    assert_eq!(
        fs::read_dir(&destination).expect("must list").count(),
        0,
        "failed backup must clean up"
    );

    let _ = fs::remove_dir_all(&root);
}

fn record(name: &str, path: &str) -> EnvironmentRecord {
    EnvironmentRecord::new(name, path, "Python 3.11.7")
}

fn test_root(label: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    std::env::temp_dir().join(format!(
        "envdeck-registry-tests-{label}-{}-{nanos}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ))
}
