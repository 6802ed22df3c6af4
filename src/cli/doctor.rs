//! `vpn-panel doctor` - preflight diagnostics.
//!
//! Validates configuration and checks the host before the panel is booted.
//! Each check reports pass, fail or skip with a hint on failure.

use std::path::Path;

use crate::config::{Config, DatabaseBackend, HostBackendKind};
use crate::model::ServiceKind;
use crate::provisioning::xray;

/// Run every check and print the results.
pub async fn run_doctor(config_env: Option<&Path>, strict: bool) -> anyhow::Result<()> {
    println!("vpn-panel doctor");
    println!("================\n");

    let mut passed = 0u32;
    let mut failed = 0u32;

    let config = match Config::from_env_with_file(config_env) {
        Ok(config) => {
            check(
                "Configuration",
                CheckResult::Pass("all required variables set".into()),
                &mut passed,
                &mut failed,
            );
            config
        }
        Err(err) => {
            check(
                "Configuration",
                CheckResult::Fail(err.to_string()),
                &mut passed,
                &mut failed,
            );
            println!("\n  Remaining checks need a valid configuration.");
            anyhow::bail!("configuration is invalid: {err}");
        }
    };

    check(
        "Database",
        check_database(config.database.backend, &config.database.path),
        &mut passed,
        &mut failed,
    );

    check(
        "Xray config",
        check_xray_config(&config.provisioning.xray_config_path),
        &mut passed,
        &mut failed,
    );

    match config.provisioning.host_backend {
        HostBackendKind::Shell => {
            for tool in ["useradd", "chpasswd", "chage", "userdel"] {
                check(tool, check_on_path(tool), &mut passed, &mut failed);
            }
        }
        HostBackendKind::Noop => check(
            "Host accounts",
            CheckResult::Skip("HOST_BACKEND=noop, host is never touched".into()),
            &mut passed,
            &mut failed,
        ),
    }

    check(
        "Xray reload command",
        match config.provisioning.reload_command.first() {
            Some(program) => check_on_path(program),
            None => CheckResult::Skip("XRAY_RELOAD_COMMAND is empty".into()),
        },
        &mut passed,
        &mut failed,
    );

    check(
        "HTTP bind port",
        check_port_available(&config.http.host, config.http.port),
        &mut passed,
        &mut failed,
    );

    check(
        "Telegram bot",
        if config.telegram.bot_token.is_some() {
            CheckResult::Pass(format!("token set, API {}", config.telegram.api_base_url))
        } else {
            CheckResult::Skip("TELEGRAM_BOT_TOKEN not set".into())
        },
        &mut passed,
        &mut failed,
    );

    println!();
    println!("  {passed} passed, {failed} failed");

    if failed > 0 {
        println!("\n  Fix the failed checks before serving.");
        if strict {
            anyhow::bail!("doctor strict mode failed with {failed} check(s)");
        }
    }

    Ok(())
}

fn check(name: &str, result: CheckResult, passed: &mut u32, failed: &mut u32) {
    match result {
        CheckResult::Pass(detail) => {
            *passed += 1;
            println!("  [pass] {name}: {detail}");
        }
        CheckResult::Fail(detail) => {
            *failed += 1;
            println!("  [FAIL] {name}: {detail}");
        }
        CheckResult::Skip(reason) => {
            println!("  [skip] {name}: {reason}");
        }
    }
}

#[derive(Debug)]
enum CheckResult {
    Pass(String),
    Fail(String),
    Skip(String),
}

fn check_database(backend: DatabaseBackend, path: &Path) -> CheckResult {
    match backend {
        DatabaseBackend::Memory => {
            CheckResult::Pass("in-memory backend (state is lost on exit)".into())
        }
        DatabaseBackend::LibSql if path.exists() => {
            CheckResult::Pass(format!("libSQL database exists ({})", path.display()))
        }
        DatabaseBackend::LibSql => match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() && !dir.exists() => CheckResult::Pass(
                format!(
                    "{} will be created on first run (directory {} is created too)",
                    path.display(),
                    dir.display()
                ),
            ),
            _ => CheckResult::Pass(format!(
                "libSQL database not found at {} (will be created on first run)",
                path.display()
            )),
        },
    }
}

fn check_xray_config(path: &Path) -> CheckResult {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => return CheckResult::Fail(format!("cannot read {}: {e}", path.display())),
    };
    let doc: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(doc) => doc,
        Err(e) => return CheckResult::Fail(format!("{} is not valid JSON: {e}", path.display())),
    };

    let mut found = Vec::new();
    for kind in ServiceKind::ALL.into_iter().filter(|k| k.is_tunnel()) {
        match xray::clients(&doc, kind) {
            Ok(clients) => found.push(format!("{kind}={}", clients.len())),
            Err(e) => return CheckResult::Fail(e.to_string()),
        }
    }
    CheckResult::Pass(format!("clients {}", found.join(" ")))
}

fn check_on_path(program: &str) -> CheckResult {
    if program.contains('/') {
        return if Path::new(program).is_file() {
            CheckResult::Pass(program.to_string())
        } else {
            CheckResult::Fail(format!("{program} does not exist"))
        };
    }
    let Some(paths) = std::env::var_os("PATH") else {
        return CheckResult::Fail("PATH is not set".into());
    };
    match std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
    {
        Some(found) => CheckResult::Pass(found.display().to_string()),
        None => CheckResult::Fail(format!("{program} not found in PATH")),
    }
}

fn check_port_available(host: &str, port: u16) -> CheckResult {
    match std::net::TcpListener::bind((host, port)) {
        Ok(listener) => {
            drop(listener);
            CheckResult::Pass(format!("{host}:{port} is available"))
        }
        Err(error) => CheckResult::Fail(format!(
            "{host}:{port} is unavailable ({error}); free the port or change HTTP_PORT"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format_result(r: &CheckResult) -> String {
        match r {
            CheckResult::Pass(s) => format!("Pass({s})"),
            CheckResult::Fail(s) => format!("Fail({s})"),
            CheckResult::Skip(s) => format!("Skip({s})"),
        }
    }

    #[test]
    fn finds_sh_on_path() {
        match check_on_path("sh") {
            CheckResult::Pass(_) => {}
            other => panic!("expected Pass for sh, got: {}", format_result(&other)),
        }
    }

    #[test]
    fn missing_binary_fails() {
        match check_on_path("__vpn_panel_nonexistent_binary__") {
            CheckResult::Fail(_) => {}
            other => panic!("expected Fail, got: {}", format_result(&other)),
        }
    }

    #[test]
    fn xray_config_with_all_inbounds_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, xray::default_document().to_string()).unwrap();

        match check_xray_config(&path) {
            CheckResult::Pass(detail) => assert!(detail.contains("vless=0"), "{detail}"),
            other => panic!("expected Pass, got: {}", format_result(&other)),
        }
    }

    #[test]
    fn xray_config_problems_fail() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        assert!(matches!(check_xray_config(&missing), CheckResult::Fail(_)));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(check_xray_config(&broken), CheckResult::Fail(_)));

        let empty = dir.path().join("empty.json");
        std::fs::write(&empty, r#"{"inbounds": []}"#).unwrap();
        assert!(matches!(check_xray_config(&empty), CheckResult::Fail(_)));
    }

    #[test]
    fn memory_database_always_passes() {
        let result = check_database(DatabaseBackend::Memory, Path::new("ignored"));
        assert!(matches!(result, CheckResult::Pass(_)));
    }
}
