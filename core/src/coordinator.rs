//! Per-seed command execution
//!
//! Every operation follows the same shape: load the seed's context, validate,
//! check local preconditions, run the pre-hook, perform the effect, run the
//! post-hook, then record `lastCmd` and persist. Failures are turned into
//! `status: "error"` results rather than propagated.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::health::{is_process_alive, HealthMonitor};
use crate::hooks::builtin::Builtins;
use crate::hooks::{
    payload, str_field, HookPipeline, BUFFER_CLEAR, BUFFER_GET, DATA_RECEIVED, LOG_ENTRY,
    SESSION_CREATED, SESSION_POST_CONNECT, SESSION_POST_SEND, SESSION_POST_SERVE,
    SESSION_PRE_CONNECT, SESSION_PRE_DISCONNECT, SESSION_PRE_SEND, SESSION_PRE_SERVE,
    SESSION_PRE_STOP, VALIDATE_INPUT,
};
use crate::paths::{remove_file_best_effort, seed_hash, Paths};
use crate::registry::SessionRegistry;
use crate::store::ContextStore;
use crate::supervisor::DaemonSupervisor;
use crate::tunnel::TunnelLauncher;
use crate::types::{CommandResult, LogLevel, SeedContext, SessionState};

/// An operation against one seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Connect {
        user: Option<String>,
        remote_seed: Option<String>,
    },
    Send {
        text: String,
    },
    Receive,
    Disconnect,
    Serve {
        port: Option<u16>,
    },
    Stop,
    Status,
    Export,
    Import {
        data: String,
    },
}

impl SessionCommand {
    pub fn name(&self) -> &'static str {
        match self {
            SessionCommand::Connect { .. } => "connect",
            SessionCommand::Send { .. } => "send",
            SessionCommand::Receive => "receive",
            SessionCommand::Disconnect => "disconnect",
            SessionCommand::Serve { .. } => "serve",
            SessionCommand::Stop => "stop",
            SessionCommand::Status => "status",
            SessionCommand::Export => "export",
            SessionCommand::Import { .. } => "import",
        }
    }

    /// Arguments as recorded in `lastCmd`.
    fn args(&self) -> Value {
        match self {
            SessionCommand::Connect { user, remote_seed } => {
                json!({"user": user, "hypersshSeed": remote_seed})
            }
            SessionCommand::Send { text } => json!({"text": text}),
            SessionCommand::Serve { port } => json!({"port": port}),
            // Exported blobs can be large; the fact of the import is enough
            SessionCommand::Import { data } => json!({"bytes": data.len()}),
            _ => json!({}),
        }
    }
}

/// Session id under which a seed's daemon session appears in the registry
/// and the hook payloads.
pub fn seed_session_id(seed: &str) -> String {
    format!("seed-{}", &seed_hash(seed)[..16])
}

fn stale_connection(seed: &str) -> String {
    format!(
        "Daemon is not responding. Stale connection detected. Run \"connect --seed {}\" to reconnect",
        seed
    )
}

/// Login name of the invoking user.
pub fn current_user() -> String {
    nix::unistd::User::from_uid(nix::unistd::getuid())
        .ok()
        .flatten()
        .map(|u| u.name)
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "shelly".to_string())
}

pub struct SessionCoordinator {
    paths: Paths,
    store: ContextStore,
    registry: Arc<SessionRegistry>,
    pipeline: Arc<HookPipeline>,
    builtins: Builtins,
    supervisor: DaemonSupervisor,
    health: HealthMonitor,
    tunnel: TunnelLauncher,
}

impl SessionCoordinator {
    /// Wire up a coordinator over the SQLite store in `paths`, with the
    /// built-in plugins not disabled by `config`.
    pub fn open(paths: Paths, config: &Config) -> Result<Self> {
        paths.ensure_dirs()?;
        let store = ContextStore::open(&paths.database())?;
        Self::with_store(paths, config, store)
    }

    pub fn with_store(paths: Paths, config: &Config, store: ContextStore) -> Result<Self> {
        let registry = Arc::new(SessionRegistry::new(config.logging.max_entries));
        let pipeline = Arc::new(HookPipeline::new().with_registry(Arc::clone(&registry)));
        let builtins = Builtins::new(Arc::clone(&registry));
        builtins.install(&pipeline, &config.plugins.disabled)?;

        Ok(Self {
            supervisor: DaemonSupervisor::new(paths.clone(), config.daemon.clone()),
            health: HealthMonitor::new(paths.clone())
                .with_probe_timeout(config.daemon.probe_timeout()),
            tunnel: TunnelLauncher::new(paths.clone(), config.tunnel.clone()),
            paths,
            store,
            registry,
            pipeline,
            builtins,
        })
    }

    pub fn pipeline(&self) -> &Arc<HookPipeline> {
        &self.pipeline
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Run `command` against `seed`. Never fails: errors come back as
    /// `status: "error"` results naming the command.
    pub async fn execute(&self, seed: &str, command: SessionCommand) -> CommandResult {
        let name = command.name();
        debug!("Executing {} for seed", name);

        match self.run(seed, &command).await {
            Ok(result) => result,
            Err(e) => {
                warn!("{} failed: {}", name, e);
                self.registry
                    .log(LogLevel::Error, format!("{}: {}", name, e), None);
                CommandResult::failure(seed, name, e.to_string())
            }
        }
    }

    async fn run(&self, seed: &str, command: &SessionCommand) -> Result<CommandResult> {
        self.validate_input("seed", seed).await?;
        let mut ctx = self.store.load(seed)?;

        let outcome = match command {
            SessionCommand::Connect { user, remote_seed } => {
                self.connect(&mut ctx, user.as_deref(), remote_seed.as_deref())
                    .await
            }
            SessionCommand::Send { text } => self.send(&mut ctx, text).await,
            SessionCommand::Receive => self.receive(&ctx).await,
            SessionCommand::Disconnect => self.disconnect(&mut ctx).await,
            SessionCommand::Serve { port } => self.serve(&mut ctx, *port).await,
            SessionCommand::Stop => self.stop(&mut ctx).await,
            SessionCommand::Status => Ok(self.status(&mut ctx).await),
            SessionCommand::Export => Self::export(&ctx),
            SessionCommand::Import { data } => ContextStore::import(seed, data).map(|imported| {
                ctx = imported;
                CommandResult::success(seed, "Imported")
            }),
        };

        // Downgrades made on the failure path are persisted too. A successful
        // import keeps the imported record as is.
        let imported = matches!(command, SessionCommand::Import { .. }) && outcome.is_ok();
        if !imported {
            ctx.record_command(command.name(), command.args());
        }
        match outcome {
            Ok(result) => {
                self.store.save(&ctx)?;
                Ok(result)
            }
            Err(e) => {
                if let Err(save_err) = self.store.save(&ctx) {
                    warn!("Failed to persist context: {}", save_err);
                }
                Err(e)
            }
        }
    }

    async fn validate_input(&self, field: &str, value: &str) -> Result<()> {
        self.pipeline
            .dispatch(VALIDATE_INPUT, payload(json!({"field": field, "value": value})))
            .await?;
        Ok(())
    }

    /// Mirror a connected seed into the in-process registry.
    async fn adopt_session(&self, ctx: &SeedContext) -> Result<String> {
        let id = seed_session_id(&ctx.seed);
        if !self.registry.contains(&id) {
            let user = ctx.user.clone().unwrap_or_default();
            self.registry.create(&id, &ctx.seed, &user);
            self.pipeline
                .dispatch(
                    SESSION_CREATED,
                    payload(json!({"sessionId": id, "seed": ctx.seed, "user": user})),
                )
                .await?;
        }
        self.registry.set_state(&id, SessionState::Connected);
        Ok(id)
    }

    async fn log_entry(&self, session: &str, level: LogLevel, msg: &str) {
        let entry = payload(json!({"sessionId": session, "level": level.as_str(), "msg": msg}));
        if let Err(e) = self.pipeline.dispatch(LOG_ENTRY, entry).await {
            debug!("log:entry hook failed: {}", e);
        }
    }

    async fn connect(
        &self,
        ctx: &mut SeedContext,
        user: Option<&str>,
        remote_seed: Option<&str>,
    ) -> Result<CommandResult> {
        let user = user.map(str::to_string).unwrap_or_else(current_user);
        self.validate_input("user", &user).await?;
        let remote_seed = remote_seed
            .map(str::to_string)
            .unwrap_or_else(|| seed_hash(&ctx.seed));
        let id = seed_session_id(&ctx.seed);

        let request = payload(json!({"seed": ctx.seed, "user": user, "sessionId": id}));
        let request = self.pipeline.dispatch(SESSION_PRE_CONNECT, request).await?;

        // A daemon that died without draining leaves its endpoint behind
        let endpoint = self.paths.endpoint(&ctx.seed);
        if endpoint.exists() && !self.health.is_reachable(&ctx.seed).await {
            warn!("Removing stale endpoint {:?}", endpoint);
            remove_file_best_effort(&endpoint);
        }

        let handle = self
            .supervisor
            .ensure_running(&ctx.seed, &user, Some(&remote_seed))
            .await?;

        ctx.connected = true;
        ctx.hyperssh_seed = Some(remote_seed.clone());
        ctx.user = Some(user.clone());
        ctx.connected_at = Some(Utc::now());
        ctx.daemon_pid = handle.pid;

        if let Err(e) = self.paths.write_current_seed(&ctx.seed) {
            warn!("Failed to write current-seed pointer: {}", e);
        }

        self.adopt_session(ctx).await?;
        self.pipeline.dispatch(SESSION_POST_CONNECT, request).await?;
        self.log_entry(&id, LogLevel::Info, "Connected").await;
        info!("Connected as {}", user);

        let mut result = CommandResult::success(&ctx.seed, "Connected");
        result.user = Some(user);
        result.hyperssh_seed = Some(remote_seed);
        result.pid = handle.pid;
        Ok(result)
    }

    async fn send(&self, ctx: &mut SeedContext, text: &str) -> Result<CommandResult> {
        if !ctx.connected {
            return Err(Error::NotConnected);
        }
        if text.is_empty() {
            return Err(Error::Validation("text required".into()));
        }
        if !self.health.is_reachable(&ctx.seed).await {
            ctx.reset_connection();
            return Err(Error::Precondition(stale_connection(&ctx.seed)));
        }

        let id = self.adopt_session(ctx).await?;
        let request = payload(json!({"sessionId": id, "data": text}));
        let request = self.pipeline.dispatch(SESSION_PRE_SEND, request).await?;

        let output = self.supervisor.client(&ctx.seed).send_text(text).await?;

        self.pipeline
            .dispatch(
                DATA_RECEIVED,
                payload(json!({"sessionId": id, "content": output})),
            )
            .await?;
        self.pipeline.dispatch(SESSION_POST_SEND, request).await?;

        let mut result = CommandResult::success(&ctx.seed, "Sent and received");
        result.command = Some(text.to_string());
        result.output = Some(output);
        Ok(result)
    }

    /// Buffered output for the seed, cleared once read.
    ///
    /// The buffer lives in this process, so output only accumulates across
    /// commands run through the same coordinator.
    async fn receive(&self, ctx: &SeedContext) -> Result<CommandResult> {
        if !ctx.connected {
            return Err(Error::NotConnected);
        }

        let id = seed_session_id(&ctx.seed);
        let out = self
            .pipeline
            .dispatch(BUFFER_GET, payload(json!({"sessionId": id})))
            .await?;
        let data = str_field(&out, "content").unwrap_or_default().to_string();
        self.pipeline
            .dispatch(BUFFER_CLEAR, payload(json!({"sessionId": id})))
            .await?;

        let message = if data.is_empty() {
            "No buffered output (send returns output immediately)"
        } else {
            "Received"
        };
        let mut result = CommandResult::success(&ctx.seed, message);
        result.data = Some(data);
        Ok(result)
    }

    async fn disconnect(&self, ctx: &mut SeedContext) -> Result<CommandResult> {
        let id = seed_session_id(&ctx.seed);
        if ctx.connected {
            self.pipeline
                .dispatch(SESSION_PRE_DISCONNECT, payload(json!({"sessionId": id})))
                .await?;
            self.supervisor.stop(&ctx.seed).await;
        } else if self.paths.endpoint(&ctx.seed).exists() {
            debug!("Endpoint lingers for a disconnected seed, stopping");
            self.supervisor.stop(&ctx.seed).await;
        }

        ctx.reset_connection();
        self.registry.set_state(&id, SessionState::Disconnected);
        self.paths.clear_current_seed(&ctx.seed);

        Ok(CommandResult::success(&ctx.seed, "Disconnected"))
    }

    async fn serve(&self, ctx: &mut SeedContext, port: Option<u16>) -> Result<CommandResult> {
        if ctx.serving {
            if let Some(pid) = ctx.server_pid {
                if is_process_alive(pid) {
                    return Err(Error::Precondition("Already serving on this seed".into()));
                }
                debug!("Recorded tunnel pid {} is gone, resetting", pid);
                ctx.reset_serving();
            }
        }

        let port = port.unwrap_or_else(|| self.tunnel.pick_port());
        let user = current_user();

        let request = payload(json!({"seed": ctx.seed, "port": port, "user": user}));
        let request = self.pipeline.dispatch(SESSION_PRE_SERVE, request).await?;

        let pid = self.tunnel.start(&ctx.seed, port)?;

        ctx.serving = true;
        ctx.server_port = Some(port);
        ctx.server_pid = Some(pid);
        ctx.user = Some(user.clone());

        let mut request = request;
        request.insert("pid".into(), json!(pid));
        self.pipeline.dispatch(SESSION_POST_SERVE, request).await?;

        let mut result = CommandResult::success(&ctx.seed, "Server started");
        result.port = Some(port);
        result.user = Some(user);
        result.pid = Some(pid);
        result.connect_with = Some(format!("shelly connect --seed {}", ctx.seed));
        Ok(result)
    }

    async fn stop(&self, ctx: &mut SeedContext) -> Result<CommandResult> {
        let pid = match ctx.server_pid {
            Some(pid) if ctx.serving => pid,
            _ => return Err(Error::Precondition("No server running".into())),
        };

        if !is_process_alive(pid) {
            ctx.reset_serving();
            return Err(Error::Precondition(
                "Server process is not running. Already stopped".into(),
            ));
        }

        self.pipeline
            .dispatch(
                SESSION_PRE_STOP,
                payload(json!({"seed": ctx.seed, "pid": pid})),
            )
            .await?;
        self.tunnel.stop(pid);
        ctx.reset_serving();

        Ok(CommandResult::success(&ctx.seed, "Server stopped"))
    }

    /// Report the seed's state, re-probing every recorded process and
    /// persisting any downgrade.
    async fn status(&self, ctx: &mut SeedContext) -> CommandResult {
        let mut result = CommandResult {
            message: None,
            ..CommandResult::success(&ctx.seed, "")
        };
        result.created_at = Some(ctx.created_at);
        result.last_cmd = ctx.last_cmd.clone();
        let mut warnings = Vec::new();

        if let Some(pid) = ctx.server_pid {
            let alive = is_process_alive(pid);
            result.serving = Some(alive);
            result.server_port = ctx.server_port;
            result.server_pid = Some(pid);
            if !alive {
                warnings.push(format!(
                    "Server process is not running. Call \"serve --seed {}\" to restart",
                    ctx.seed
                ));
                ctx.reset_serving();
            }
        } else {
            result.serving = Some(false);
        }

        if ctx.connected {
            let reachable = self.health.is_reachable(&ctx.seed).await;
            result.connected = Some(reachable);
            result.hyperssh_seed = ctx.hyperssh_seed.clone();
            result.connected_at = ctx.connected_at;
            if !reachable {
                warnings.push(stale_connection(&ctx.seed));
                ctx.reset_connection();
            }
        } else {
            result.connected = Some(false);
        }

        result.user = ctx.user.clone();
        if !warnings.is_empty() {
            result.warning = Some(warnings.join("; "));
        }
        result
    }

    fn export(ctx: &SeedContext) -> Result<CommandResult> {
        let mut result = CommandResult::success(&ctx.seed, "Exported");
        result.data = Some(ContextStore::export(ctx)?);
        Ok(result)
    }
}
