use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use envdeck_core::{CommandRunner, ExitResult, Invocation, LineSink, NullSink, ProcessError};
use envdeck_registry::EnvironmentRegistry;

use crate::{
    create_environment, import_environment, merge_outdated, normalize_name,
    system_python_version, InstalledPackage, LatestVersion, OutdatedPackage, PackageError,
    PackageService, NOT_INSTALLED, UNKNOWN_VERSION,
};

#[derive(Debug)]
enum Reply {
    Exit {
        code: i32,
        stdout: &'static str,
        stderr: &'static str,
    },
    Timeout,
}

#[derive(Debug)]
struct Rule {
    program_suffix: &'static str,
    args: Vec<String>,
    reply: Reply,
    creates: Vec<PathBuf>,
}

/// Answers invocations from a fixed script and records every call.
#[derive(Debug, Default)]
struct ScriptedRunner {
    rules: Vec<Rule>,
    calls: RefCell<Vec<Invocation>>,
}

impl ScriptedRunner {
    fn on(mut self, program_suffix: &'static str, args: &[&str], reply: Reply) -> Self {
        self.rules.push(Rule {
            program_suffix,
            args: args.iter().map(|arg| arg.to_string()).collect(),
            reply,
            creates: Vec::new(),
        });
        self
    }

    fn creating(mut self, files: Vec<PathBuf>) -> Self {
        if let Some(rule) = self.rules.last_mut() {
            rule.creates = files;
        }
        self
    }

    fn calls(&self) -> Vec<Vec<String>> {
        self.calls
            .borrow()
            .iter()
            .map(|invocation| invocation.display_args())
            .collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(
        &self,
        invocation: &Invocation,
        sink: &mut dyn LineSink,
    ) -> Result<ExitResult, ProcessError> {
        self.calls.borrow_mut().push(invocation.clone());
        let program = invocation.display_program();
        let args = invocation.display_args();
        let Some(rule) = self
            .rules
            .iter()
            .find(|rule| program.ends_with(rule.program_suffix) && rule.args == args)
        else {
            return Err(ProcessError::Launch {
                program,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no scripted reply"),
            });
        };

        for file in &rule.creates {
            if let Some(parent) = file.parent() {
                fs::create_dir_all(parent).expect("must create scripted parent");
            }
            fs::write(file, b"").expect("must create scripted file");
        }

        match &rule.reply {
            Reply::Timeout => Err(ProcessError::Timeout {
                program,
                limit: invocation.deadline.unwrap_or_default(),
            }),
            Reply::Exit {
                code,
                stdout,
                stderr,
            } => {
                let mut result = ExitResult {
                    program,
                    code: Some(*code),
                    success: *code == 0,
                    ..ExitResult::default()
                };
                if invocation.output == envdeck_core::OutputMode::Stream {
                    for (index, line) in stdout.lines().chain(stderr.lines()).enumerate() {
                        sink.line(index as u64 + 1, line);
                        result.tail.push(line.to_string());
                    }
                } else {
                    result.stdout = stdout.to_string();
                    result.stderr = stderr.to_string();
                }
                Ok(result)
            }
        }
    }
}

fn ok(stdout: &'static str) -> Reply {
    Reply::Exit {
        code: 0,
        stdout,
        stderr: "",
    }
}

fn fail(code: i32, stderr: &'static str) -> Reply {
    Reply::Exit {
        code,
        stdout: "",
        stderr,
    }
}

fn fake_env(label: &str) -> PathBuf {
    let root = test_root(label).join("venv");
    let bin = root.join(if cfg!(windows) { "Scripts" } else { "bin" });
    fs::create_dir_all(&bin).expect("must create bin dir");
    let (python, pip) = if cfg!(windows) {
        ("python.exe", "pip.exe")
    } else {
        ("python", "pip")
    };
    fs::write(bin.join(python), b"").expect("must create interpreter");
    fs::write(bin.join(pip), b"").expect("must create pip");
    root
}

fn python_name() -> &'static str {
    if cfg!(windows) {
        "python.exe"
    } else {
        "python"
    }
}

fn pip_name() -> &'static str {
    if cfg!(windows) {
        "pip.exe"
    } else {
        "pip"
    }
}

fn base_runner() -> ScriptedRunner {
    ScriptedRunner::default().on(python_name(), &["--version"], ok("Python 3.11.7\n"))
}

#[test]
fn open_rejects_directory_without_interpreter() {
    let root = test_root("no-python");
    fs::create_dir_all(&root).expect("must create root");

    let err = PackageService::open(base_runner(), &root).expect_err("must reject");
    assert!(matches!(err, PackageError::InvalidEnvironment { .. }), "{err}");
    assert!(err.to_string().contains("no interpreter found"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn open_rejects_interpreter_that_does_not_run() {
    let env = fake_env("broken-python");
    let runner = ScriptedRunner::default().on(
        python_name(),
        &["--version"],
        fail(127, "error while loading shared libraries"),
    );

    let err = PackageService::open(runner, &env).expect_err("must reject");
    assert!(matches!(err, PackageError::InvalidEnvironment { .. }));
    assert!(err.to_string().contains("error while loading shared libraries"));

    cleanup(&env);
}

#[test]
fn interpreter_version_falls_back_to_stderr_text() {
    let env = fake_env("stderr-version");
    let runner = ScriptedRunner::default().on(
        python_name(),
        &["--version"],
        Reply::Exit {
            code: 0,
            stdout: "",
            stderr: "Python 2.7.18\n",
        },
    );
    let service = PackageService::open(runner, &env).expect("must open");
    assert_eq!(service.interpreter_version(), "Python 2.7.18");

    cleanup(&env);
}

#[test]
fn list_installed_parses_structured_output() {
    let env = fake_env("list");
    let runner = base_runner().on(
        pip_name(),
        &["list", "--format=json"],
        ok(r#"[{"name": "requests", "version": "2.31.0"}, {"name": "pip", "version": "24.0"}]"#),
    );
    let service = PackageService::open(&runner, &env).expect("must open");

    let installed = service.list_installed().expect("must list");
    assert_eq!(
        installed,
        vec![
            InstalledPackage {
                name: "requests".to_string(),
                version: "2.31.0".to_string()
            },
            InstalledPackage {
                name: "pip".to_string(),
                version: "24.0".to_string()
            },
        ]
    );

    cleanup(&env);
}

#[test]
fn list_installed_reports_malformed_output() {
    let env = fake_env("list-malformed");
    let runner = base_runner().on(
        pip_name(),
        &["list", "--format=json"],
        ok("Package Version\n------- -------\n"),
    );
    let service = PackageService::open(&runner, &env).expect("must open");

    let err = service.list_installed().expect_err("must fail");
    assert!(matches!(err, PackageError::Output { .. }), "{err}");
    assert!(err.to_string().contains("list --format=json"));

    cleanup(&env);
}

#[test]
fn refresh_merges_outdated_by_name_and_keeps_up_to_date_packages() {
    let env = fake_env("refresh");
    let runner = base_runner()
        .on(
            pip_name(),
            &["list", "--format=json"],
            ok(r#"[{"name":"A","version":"1.0"},{"name":"B","version":"2.0"}]"#),
        )
        .on(
            pip_name(),
            &["list", "--outdated", "--format=json"],
            ok(r#"[{"name":"A","version":"1.0","latest_version":"1.1","latest_filetype":"wheel"}]"#),
        );
    let service = PackageService::open(&runner, &env).expect("must open");

    let refresh = service.refresh().expect("must refresh");
    assert!(refresh.outdated_error.is_none());
    assert_eq!(refresh.packages.len(), 2);
    assert_eq!(refresh.packages[0].name, "A");
    assert_eq!(refresh.packages[0].upgradable_to(), Some("1.1"));
    assert_eq!(refresh.packages[1].name, "B");
    assert_eq!(refresh.packages[1].latest, LatestVersion::UpToDate);

    let calls = runner.calls();
    let list_index = calls
        .iter()
        .position(|args| args == &["list", "--format=json"])
        .expect("base list must run");
    let outdated_index = calls
        .iter()
        .position(|args| args.contains(&"--outdated".to_string()))
        .expect("outdated check must run");
    assert!(list_index < outdated_index, "base list must run first");

    cleanup(&env);
}

#[test]
fn refresh_survives_outdated_timeout() {
    let env = fake_env("refresh-timeout");
    let runner = base_runner()
        .on(
            pip_name(),
            &["list", "--format=json"],
            ok(r#"[{"name":"A","version":"1.0"}]"#),
        )
        .on(
            pip_name(),
            &["list", "--outdated", "--format=json"],
            Reply::Timeout,
        );
    let service = PackageService::open(&runner, &env)
        .expect("must open")
        .with_outdated_deadline(Some(Duration::from_secs(5)));

    let refresh = service.refresh().expect("listing must still succeed");
    assert_eq!(refresh.packages[0].latest, LatestVersion::NotChecked);
    let err = refresh.outdated_error.expect("outdated failure must be reported");
    assert!(matches!(err, PackageError::PackageManager { .. }));
    assert!(err.to_string().contains("did not finish within 5s"), "{err}");

    let outdated_call = runner
        .calls
        .borrow()
        .iter()
        .find(|invocation| invocation.display_args().contains(&"--outdated".to_string()))
        .cloned()
        .expect("outdated check must run");
    assert_eq!(outdated_call.deadline, Some(Duration::from_secs(5)));

    cleanup(&env);
}

#[test]
fn merge_matches_normalized_names() {
    let installed = vec![InstalledPackage {
        name: "Typing_Extensions".to_string(),
        version: "4.8.0".to_string(),
    }];
    let outdated = vec![OutdatedPackage {
        name: "typing-extensions".to_string(),
        current_version: "4.8.0".to_string(),
        latest_version: "4.12.2".to_string(),
    }];

    let merged = merge_outdated(installed, &outdated);
    assert_eq!(merged[0].name, "Typing_Extensions");
    assert_eq!(merged[0].upgradable_to(), Some("4.12.2"));
}

#[test]
fn normalize_name_collapses_separator_runs() {
    assert_eq!(normalize_name("Friendly-Bard"), "friendly-bard");
    assert_eq!(normalize_name("friendly.__bard"), "friendly-bard");
    assert_eq!(normalize_name("zope.interface"), "zope-interface");
}

#[test]
fn install_builds_pinned_requirement_and_streams_output() {
    let env = fake_env("install");
    let runner = base_runner().on(
        pip_name(),
        &["install", "requests==2.31.0"],
        ok("Collecting requests==2.31.0\nSuccessfully installed requests-2.31.0\n"),
    );
    let service = PackageService::open(&runner, &env).expect("must open");

    let mut lines = Vec::new();
    let mut sink = |seq: u64, text: &str| lines.push((seq, text.to_string()));
    service
        .install("requests", Some("2.31.0"), &mut sink)
        .expect("must install");

    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1].1, "Successfully installed requests-2.31.0");
    let last = runner.calls.borrow().last().cloned().expect("install call");
    assert_eq!(last.output, envdeck_core::OutputMode::Stream);

    cleanup(&env);
}

#[test]
fn install_without_version_uses_bare_name() {
    let env = fake_env("install-bare");
    let runner = base_runner().on(pip_name(), &["install", "rich"], ok(""));
    let service = PackageService::open(&runner, &env).expect("must open");

    service
        .install("rich", Some("  "), &mut NullSink)
        .expect("must install");
    assert_eq!(runner.calls().last(), Some(&vec!["install".to_string(), "rich".to_string()]));

    cleanup(&env);
}

#[test]
fn failed_install_carries_pip_message() {
    let env = fake_env("install-fail");
    let runner = base_runner().on(
        pip_name(),
        &["install", "nosuchpkg"],
        fail(
            1,
            "ERROR: Could not find a version that satisfies the requirement nosuchpkg",
        ),
    );
    let service = PackageService::open(&runner, &env).expect("must open");

    let err = service
        .install("nosuchpkg", None, &mut NullSink)
        .expect_err("must fail");
    assert!(matches!(
        err,
        PackageError::Process(ProcessError::Exit { code: Some(1), .. })
    ));
    assert!(err.to_string().contains("Could not find a version"));

    cleanup(&env);
}

#[test]
fn uninstall_passes_yes_flag() {
    let env = fake_env("uninstall");
    let runner = base_runner().on(
        pip_name(),
        &["uninstall", "-y", "rich"],
        ok("Successfully uninstalled rich-13.7.0\n"),
    );
    let service = PackageService::open(&runner, &env).expect("must open");
    service.uninstall("rich", &mut NullSink).expect("must uninstall");

    cleanup(&env);
}

#[test]
fn upgrade_all_issues_one_call_for_every_package() {
    let env = fake_env("upgrade-all");
    let runner = base_runner().on(
        pip_name(),
        &["install", "--upgrade", "A", "B", "C"],
        ok("Successfully installed A-1.1 B-2.1 C-3.1\n"),
    );
    let service = PackageService::open(&runner, &env).expect("must open");

    let names = vec!["A".to_string(), "B".to_string(), "C".to_string()];
    service
        .upgrade_all(&names, &mut NullSink)
        .expect("must upgrade");

    let pip_calls: Vec<Vec<String>> = runner
        .calls()
        .into_iter()
        .filter(|args| args.first().map(String::as_str) == Some("install"))
        .collect();
    assert_eq!(pip_calls.len(), 1);

    service
        .upgrade_all(&[], &mut NullSink)
        .expect("empty upgrade is a no-op");
    assert_eq!(runner.calls().len(), 2);

    cleanup(&env);
}

#[test]
fn upgrade_single_package_uses_upgrade_flag() {
    let env = fake_env("upgrade");
    let runner = base_runner().on(pip_name(), &["install", "--upgrade", "rich"], ok(""));
    let service = PackageService::open(&runner, &env).expect("must open");
    service.upgrade("rich", &mut NullSink).expect("must upgrade");

    cleanup(&env);
}

#[test]
fn install_local_checks_file_before_running_pip() {
    let env = fake_env("install-local");
    let runner = base_runner();
    let service = PackageService::open(&runner, &env).expect("must open");
    let calls_before = runner.calls().len();

    let missing = env.join("dist").join("tool-1.0-py3-none-any.whl");
    let err = service
        .install_local(&missing, &mut NullSink)
        .expect_err("must fail");
    assert!(matches!(err, PackageError::FileNotFound { .. }));
    assert_eq!(runner.calls().len(), calls_before, "pip must not run");

    cleanup(&env);
}

#[test]
fn install_local_passes_file_path() {
    let env = fake_env("install-local-ok");
    let wheel = env.join("tool-1.0-py3-none-any.whl");
    fs::write(&wheel, b"wheel").expect("must write wheel");
    let wheel_arg = wheel.display().to_string();
    let runner = base_runner().on(pip_name(), &["install", wheel_arg.as_str()], ok(""));
    let service = PackageService::open(&runner, &env).expect("must open");

    service
        .install_local(&wheel, &mut NullSink)
        .expect("must install");

    cleanup(&env);
}

#[test]
fn dependencies_report_missing_ones_as_not_installed() {
    let env = fake_env("deps");
    let runner = base_runner()
        .on(
            pip_name(),
            &["show", "pkg"],
            ok("Name: pkg\nVersion: 1.0\nRequires: X, Y\nRequired-by: app, tool\n"),
        )
        .on(pip_name(), &["show", "X"], ok("Name: X\nVersion: 3.0\nRequires: \n"))
        .on(
            pip_name(),
            &["show", "Y"],
            fail(1, "WARNING: Package(s) not found: Y"),
        );
    let service = PackageService::open(&runner, &env).expect("must open");

    let report = service.show_dependencies("pkg").expect("must report");
    let rows: Vec<(&str, &str, &str)> = report
        .dependencies
        .iter()
        .map(|entry| {
            (
                entry.name.as_str(),
                entry.version.as_str(),
                entry.required_by.as_str(),
            )
        })
        .collect();
    assert_eq!(
        rows,
        vec![("X", "3.0", "pkg"), ("Y", NOT_INSTALLED, "pkg")]
    );
    assert_eq!(report.required_by, vec!["app", "tool"]);

    cleanup(&env);
}

#[test]
fn dependencies_of_leaf_package_are_empty() {
    let env = fake_env("deps-leaf");
    let runner = base_runner().on(
        pip_name(),
        &["show", "six"],
        ok("Name: six\nVersion: 1.16.0\nRequires: \nRequired-by: \n"),
    );
    let service = PackageService::open(&runner, &env).expect("must open");

    let report = service.show_dependencies("six").expect("must report");
    assert!(report.dependencies.is_empty());
    assert!(report.required_by.is_empty());

    cleanup(&env);
}

#[test]
fn dependencies_of_unknown_package_fail() {
    let env = fake_env("deps-unknown");
    let runner = base_runner().on(
        pip_name(),
        &["show", "ghost"],
        fail(1, "WARNING: Package(s) not found: ghost"),
    );
    let service = PackageService::open(&runner, &env).expect("must open");

    let err = service.show_dependencies("ghost").expect_err("must fail");
    assert!(err.to_string().contains("not found: ghost"));

    cleanup(&env);
}

#[test]
fn created_environment_lists_interpreter_version_verbatim() {
    let root = test_root("create");
    let location = root.join("envs");
    let env_root = location.join("analytics");
    let env_arg = env_root.display().to_string();
    let runner = ScriptedRunner::default()
        .on("python3.11", &["-m", "venv", env_arg.as_str()], ok(""))
        .creating(vec![
            env_root.join("bin").join(python_name()),
            env_root.join("bin").join(pip_name()),
            env_root.join("Scripts").join(python_name()),
            env_root.join("Scripts").join(pip_name()),
        ])
        .on(python_name(), &["--version"], ok("Python 3.11.7\n"));

    let record = create_environment(
        &runner,
        Path::new("/usr/bin/python3.11"),
        &location,
        "analytics",
    )
    .expect("must create");

    let registry_path = root.join("environments.json");
    let mut registry = EnvironmentRegistry::empty(&registry_path);
    registry.add(record).expect("must register");

    let (listed, issue) = EnvironmentRegistry::load(&registry_path);
    assert!(issue.is_none());
    assert_eq!(listed.records().len(), 1);
    assert_eq!(listed.records()[0].name, "analytics");
    assert_eq!(listed.records()[0].path, env_root);
    assert_eq!(listed.records()[0].interpreter_version, "Python 3.11.7");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn failed_venv_creation_reports_interpreter_error() {
    let root = test_root("create-fail");
    let env_arg = root.join("bad").display().to_string();
    let runner = ScriptedRunner::default().on(
        "python3",
        &["-m", "venv", env_arg.as_str()],
        fail(1, "Error: [Errno 13] Permission denied"),
    );

    let err = create_environment(&runner, Path::new("python3"), &root, "bad")
        .expect_err("must fail");
    assert!(err.to_string().contains("Permission denied"));
}

#[test]
fn import_uses_directory_name() {
    let env = fake_env("import");
    let runner = base_runner();

    let record = import_environment(&runner, &env).expect("must import");
    assert_eq!(record.name, "venv");
    assert_eq!(record.interpreter_version, "Python 3.11.7");

    let missing = import_environment(&runner, &env.join("nope")).expect_err("must fail");
    assert!(matches!(missing, PackageError::InvalidEnvironment { .. }));

    cleanup(&env);
}

#[test]
fn system_python_version_falls_back_to_unknown() {
    let runner = ScriptedRunner::default().on("python3", &["--version"], ok("Python 3.12.1\n"));
    assert_eq!(
        system_python_version(&runner, Path::new("python3")),
        "Python 3.12.1"
    );
    assert_eq!(
        system_python_version(&ScriptedRunner::default(), Path::new("python3")),
        UNKNOWN_VERSION
    );
}

#[cfg(unix)]
mod unix {
    use std::os::unix::fs::PermissionsExt;

    use envdeck_core::SystemRunner;

    use super::*;

    fn script(path: &Path, body: &str) {
        fs::write(path, format!("#!/bin/sh\n{body}\n")).expect("must write script");
        let mut permissions = fs::metadata(path).expect("must stat").permissions();
        permissions.set_mode(0o755);
        fs::set_permissions(path, permissions).expect("must chmod");
    }

    #[test]
    fn service_drives_real_processes() {
        let env = test_root("real").join("venv");
        let bin = env.join("bin");
        fs::create_dir_all(&bin).expect("must create bin");
        script(&bin.join("python"), "echo 'Python 3.11.7'");
        script(
            &bin.join("pip"),
            r#"case "$1" in
  list) echo '[{"name":"rich","version":"13.7.0"}]' ;;
  install) echo "Collecting $2"; echo "Successfully installed $2" ;;
  *) echo "unsupported" >&2; exit 2 ;;
esac"#,
        );

        let service = PackageService::open(SystemRunner, &env).expect("must open");
        assert_eq!(service.interpreter_version(), "Python 3.11.7");
        assert_eq!(
            service.list_installed().expect("must list")[0].name,
            "rich"
        );

        let mut seen = Vec::new();
        let mut sink = |_: u64, text: &str| seen.push(text.to_string());
        service
            .install("rich", None, &mut sink)
            .expect("must install");
        assert_eq!(seen, vec!["Collecting rich", "Successfully installed rich"]);

        let err = service
            .uninstall("rich", &mut NullSink)
            .expect_err("unsupported command must fail");
        assert!(err.to_string().contains("unsupported"));

        cleanup(&env);
    }
}

fn cleanup(env: &Path) {
    if let Some(root) = env.parent() {
        let _ = fs::remove_dir_all(root);
    }
}

fn test_root(label: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    std::env::temp_dir().join(format!(
        "envdeck-pip-tests-{label}-{}-{nanos}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ))
}
