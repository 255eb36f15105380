//! Coordinator behavior against a scratch home, without a real daemon

use std::path::PathBuf;

use shelly_core::config::{Config, TunnelConfig};
use shelly_core::{ContextStore, Paths, SeedContext, SessionCommand, SessionCoordinator, Status};

fn config() -> Config {
    let mut config = Config::default();
    config.daemon.binary = Some(PathBuf::from("/bin/true"));
    config.daemon.spawn_poll_interval_ms = 10;
    config.daemon.spawn_poll_attempts = 5;
    config.daemon.shutdown_settle_ms = 10;
    config.daemon.probe_timeout_ms = 200;
    config.tunnel = TunnelConfig {
        program: "sh".to_string(),
        args: vec!["-c".into(), "sleep 30".into(), "tunnel".into()],
        ..TunnelConfig::default()
    };
    config
}

fn coordinator(home: &std::path::Path) -> SessionCoordinator {
    SessionCoordinator::open(Paths::new(home), &config()).unwrap()
}

fn stored(home: &std::path::Path, seed: &str) -> SeedContext {
    ContextStore::open(&Paths::new(home).database())
        .unwrap()
        .load(seed)
        .unwrap()
}

#[tokio::test]
async fn test_send_without_connect() {
    let home = tempfile::tempdir().unwrap();
    let coordinator = coordinator(home.path());

    let result = coordinator
        .execute(
            "abc",
            SessionCommand::Send {
                text: "ls".to_string(),
            },
        )
        .await;

    assert_eq!(result.status, Status::Error);
    assert_eq!(
        result.error.as_deref(),
        Some("Not connected. Call connect first")
    );
    assert_eq!(result.command.as_deref(), Some("send"));

    // lastCmd is recorded even for failures
    let ctx = stored(home.path(), "abc");
    assert_eq!(ctx.last_cmd.map(|c| c.name), Some("send".to_string()));
}

#[tokio::test]
async fn test_status_downgrades_stale_connection() {
    let home = tempfile::tempdir().unwrap();
    {
        let store = ContextStore::open(&Paths::new(home.path()).database()).unwrap();
        let mut ctx = SeedContext::new("abc");
        ctx.connected = true;
        ctx.user = Some("alice".to_string());
        ctx.hyperssh_seed = Some("remote".to_string());
        store.save(&ctx).unwrap();
    }

    let coordinator = coordinator(home.path());
    let result = coordinator.execute("abc", SessionCommand::Status).await;

    assert!(result.is_success());
    assert_eq!(result.connected, Some(false));
    assert!(result
        .warning
        .as_deref()
        .unwrap()
        .starts_with("Daemon is not responding. Stale connection detected."));

    let ctx = stored(home.path(), "abc");
    assert!(!ctx.connected);
    assert!(ctx.user.is_none());
    assert!(ctx.hyperssh_seed.is_none());
}

#[tokio::test]
async fn test_send_to_stale_daemon_downgrades() {
    let home = tempfile::tempdir().unwrap();
    {
        let store = ContextStore::open(&Paths::new(home.path()).database()).unwrap();
        let mut ctx = SeedContext::new("abc");
        ctx.connected = true;
        store.save(&ctx).unwrap();
    }

    let coordinator = coordinator(home.path());
    let result = coordinator
        .execute(
            "abc",
            SessionCommand::Send {
                text: "ls".to_string(),
            },
        )
        .await;

    assert_eq!(
        result.error.as_deref(),
        Some("Daemon is not responding. Stale connection detected. Run \"connect --seed abc\" to reconnect")
    );
    assert!(!stored(home.path(), "abc").connected);
}

#[tokio::test]
async fn test_connect_reports_daemon_start_failure() {
    let home = tempfile::tempdir().unwrap();
    let coordinator = coordinator(home.path());

    let result = coordinator
        .execute(
            "abc",
            SessionCommand::Connect {
                user: Some("alice".to_string()),
                remote_seed: None,
            },
        )
        .await;

    assert_eq!(result.error.as_deref(), Some("Daemon failed to start"));
    assert_eq!(result.command.as_deref(), Some("connect"));
    assert!(!stored(home.path(), "abc").connected);
}

#[tokio::test]
async fn test_connect_rejects_invalid_user() {
    let home = tempfile::tempdir().unwrap();
    let coordinator = coordinator(home.path());

    let result = coordinator
        .execute(
            "abc",
            SessionCommand::Connect {
                user: Some("not a user".to_string()),
                remote_seed: None,
            },
        )
        .await;

    assert_eq!(result.status, Status::Error);
    assert!(result.error.unwrap().starts_with("Invalid user"));
}

#[tokio::test]
async fn test_receive_requires_connection() {
    let home = tempfile::tempdir().unwrap();
    let coordinator = coordinator(home.path());

    let result = coordinator.execute("abc", SessionCommand::Receive).await;
    assert_eq!(
        result.error.as_deref(),
        Some("Not connected. Call connect first")
    );
}

#[tokio::test]
async fn test_disconnect_when_idle_is_success() {
    let home = tempfile::tempdir().unwrap();
    let coordinator = coordinator(home.path());

    let result = coordinator.execute("abc", SessionCommand::Disconnect).await;
    assert!(result.is_success());
    assert_eq!(result.message.as_deref(), Some("Disconnected"));
}

#[tokio::test]
async fn test_serve_and_stop() {
    let home = tempfile::tempdir().unwrap();
    let coordinator = coordinator(home.path());

    let started = coordinator
        .execute("abc", SessionCommand::Serve { port: Some(9321) })
        .await;
    assert!(started.is_success(), "{:?}", started.error);
    assert_eq!(started.port, Some(9321));
    assert_eq!(
        started.connect_with.as_deref(),
        Some("shelly connect --seed abc")
    );
    let pid = started.pid.unwrap();

    let again = coordinator
        .execute("abc", SessionCommand::Serve { port: None })
        .await;
    assert_eq!(again.error.as_deref(), Some("Already serving on this seed"));

    let status = coordinator.execute("abc", SessionCommand::Status).await;
    assert_eq!(status.serving, Some(true));
    assert_eq!(status.server_pid, Some(pid));
    assert_eq!(status.server_port, Some(9321));

    let stopped = coordinator.execute("abc", SessionCommand::Stop).await;
    assert_eq!(stopped.message.as_deref(), Some("Server stopped"));
    let ctx = stored(home.path(), "abc");
    assert!(!ctx.serving);
    assert!(ctx.server_pid.is_none());

    let none = coordinator.execute("abc", SessionCommand::Stop).await;
    assert_eq!(none.error.as_deref(), Some("No server running"));
}

#[tokio::test]
async fn test_stop_dead_server_resets() {
    let home = tempfile::tempdir().unwrap();
    {
        let store = ContextStore::open(&Paths::new(home.path()).database()).unwrap();
        let mut ctx = SeedContext::new("abc");
        ctx.serving = true;
        ctx.server_port = Some(9001);
        // Out of the pid range, so never alive
        ctx.server_pid = Some(u32::MAX);
        store.save(&ctx).unwrap();
    }

    let coordinator = coordinator(home.path());
    let result = coordinator.execute("abc", SessionCommand::Stop).await;
    assert_eq!(
        result.error.as_deref(),
        Some("Server process is not running. Already stopped")
    );

    let ctx = stored(home.path(), "abc");
    assert!(!ctx.serving);
    assert!(ctx.server_port.is_none());
}

#[tokio::test]
async fn test_export_import() {
    let home = tempfile::tempdir().unwrap();
    let coordinator = coordinator(home.path());

    coordinator.execute("abc", SessionCommand::Status).await;
    let exported = coordinator.execute("abc", SessionCommand::Export).await;
    let data = exported.data.unwrap();

    let imported = coordinator
        .execute("abc", SessionCommand::Import { data: data.clone() })
        .await;
    assert!(imported.is_success());

    // The stored record is the exported one, lastCmd included
    let exported_ctx = ContextStore::import("abc", &data).unwrap();
    let stored_ctx = stored(home.path(), "abc");
    assert_eq!(
        stored_ctx.last_cmd.as_ref().map(|c| c.name.as_str()),
        Some("status")
    );
    assert_eq!(stored_ctx, exported_ctx);

    let mismatch = coordinator
        .execute("xyz", SessionCommand::Import { data })
        .await;
    assert_eq!(mismatch.error.as_deref(), Some("Seed mismatch on import"));
    assert_eq!(mismatch.command.as_deref(), Some("import"));
}

#[tokio::test]
async fn test_overlong_seed_is_rejected() {
    let home = tempfile::tempdir().unwrap();
    let coordinator = coordinator(home.path());

    let seed = "a".repeat(1025);
    let result = coordinator.execute(&seed, SessionCommand::Status).await;
    assert_eq!(result.status, Status::Error);
    assert!(result.error.unwrap().contains("maximum length of 1024"));
}

#[tokio::test]
async fn test_seed_with_spaces_and_unicode() {
    let home = tempfile::tempdir().unwrap();
    let coordinator = coordinator(home.path());

    for seed in ["my seed", "café \"quoted\""] {
        let result = coordinator.execute(seed, SessionCommand::Status).await;
        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(result.seed, seed);
    }
}

/// Leave a socket file with nothing listening, as a killed daemon does.
fn leave_dead_endpoint(paths: &Paths, seed: &str) -> PathBuf {
    let endpoint = paths.endpoint(seed);
    drop(std::os::unix::net::UnixListener::bind(&endpoint).unwrap());
    assert!(endpoint.exists());
    endpoint
}

#[tokio::test]
async fn test_connect_clears_dead_endpoint() {
    let home = tempfile::tempdir().unwrap();
    let paths = Paths::new(home.path());
    let coordinator = coordinator(home.path());
    let endpoint = leave_dead_endpoint(&paths, "abc");

    // The leftover file no longer passes for a running daemon; /bin/true
    // never binds, so the fresh spawn is reported as failed
    let result = coordinator
        .execute(
            "abc",
            SessionCommand::Connect {
                user: Some("alice".to_string()),
                remote_seed: None,
            },
        )
        .await;
    assert_eq!(result.error.as_deref(), Some("Daemon failed to start"));
    assert!(!endpoint.exists());
    assert!(!stored(home.path(), "abc").connected);
}

#[tokio::test]
async fn test_disconnect_removes_lingering_endpoint() {
    let home = tempfile::tempdir().unwrap();
    let paths = Paths::new(home.path());
    let coordinator = coordinator(home.path());
    let endpoint = leave_dead_endpoint(&paths, "abc");

    assert!(!stored(home.path(), "abc").connected);
    let result = coordinator.execute("abc", SessionCommand::Disconnect).await;
    assert!(result.is_success());
    assert!(!endpoint.exists());
}
