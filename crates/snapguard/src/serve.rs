//! Guard assembly and the `serve` entry point.
//!
//! Wires config into components, then runs the local channel, the network
//! channel and the node executor until SIGINT/SIGTERM.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use snapconf::GuardConfig;
use snapstore::{FileStore, SnapStoreConfig, SnapshotStore};
use tokio::net::{TcpListener, UnixListener};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::{EngineContext, Engines};
use crate::executor::NodeExecutor;
use crate::forward::{HttpForwarder, RemoteForwarder};
use crate::identity::{GuardIdentity, TargetProcess};
use crate::local;
use crate::process::{ProcessTerminator, SignalTerminator};
use crate::publish::{ArchivePublisher, NoopPublisher, ScpPublisher};
use crate::registry::NodeRegistry;
use crate::router::CommandRouter;
use crate::tool::{CriuTool, SnapshotTool};
use crate::web::{self, WebState};

/// The replaceable collaborators of a guard.
pub struct Components {
    pub store: Arc<dyn SnapshotStore>,
    pub tool: Arc<dyn SnapshotTool>,
    pub terminator: Arc<dyn ProcessTerminator>,
    pub publisher: Arc<dyn ArchivePublisher>,
    pub forwarder: Arc<dyn RemoteForwarder>,
}

impl Components {
    /// Production components: file store, CRIU, SIGKILL, scp, HTTP.
    pub fn from_config(config: &GuardConfig) -> Result<Self> {
        let store = FileStore::new(SnapStoreConfig::with_base_path(&config.paths.store_dir))
            .with_context(|| {
                format!(
                    "Failed to open snapshot store at {}",
                    config.paths.store_dir.display()
                )
            })?;

        let forward_timeout = Duration::from_millis(config.cluster.forward_timeout_ms);
        let publisher: Arc<dyn ArchivePublisher> = if config.publish.enabled {
            Arc::new(ScpPublisher::new(
                &config.publish,
                Duration::from_secs(config.tool.timeout_secs),
            ))
        } else {
            Arc::new(NoopPublisher)
        };

        Ok(Self {
            store: Arc::new(store),
            tool: Arc::new(CriuTool::new(config.tool.clone())),
            terminator: Arc::new(SignalTerminator::new(Duration::from_millis(
                config.tool.termination_grace_ms,
            ))),
            publisher,
            forwarder: Arc::new(HttpForwarder::new(
                forward_timeout,
                config.security.token().map(str::to_string),
            )?),
        })
    }
}

/// A fully wired guard whose executor is already running.
pub struct Guard {
    identity: GuardIdentity,
    router: Arc<CommandRouter>,
    web: WebState,
    worker: JoinHandle<()>,
    cancel: CancellationToken,
}

impl Guard {
    pub fn new(
        config: &GuardConfig,
        identity: GuardIdentity,
        target: Arc<TargetProcess>,
        components: Components,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let registry = Arc::new(
            NodeRegistry::from_config(&config.cluster).context("Invalid [cluster] config")?,
        );

        let publish_peers = if config.publish.enabled {
            config.publish.peers.clone()
        } else {
            Vec::new()
        };

        let ctx = Arc::new(EngineContext {
            identity,
            store: Arc::clone(&components.store),
            tool: components.tool,
            terminator: components.terminator,
            publisher: components.publisher,
            registry: Arc::clone(&registry),
            target: Arc::clone(&target),
            work_dir: config.paths.work_dir.clone(),
            publish_peers,
        });

        let (executor, worker) = NodeExecutor::spawn(
            identity.node_id,
            Arc::new(Engines::new(ctx)),
            &config.executor,
            cancel.clone(),
        );

        let router = Arc::new(CommandRouter::new(
            identity,
            registry,
            executor,
            components.forwarder,
        ));

        let web = WebState {
            router: Arc::clone(&router),
            store: components.store,
            target,
            start_time: Instant::now(),
            token: config.security.token().map(str::to_string),
        };

        Ok(Self {
            identity,
            router,
            web,
            worker,
            cancel,
        })
    }

    pub fn router(&self) -> &Arc<CommandRouter> {
        &self.router
    }

    pub fn web_router(&self) -> axum::Router {
        web::router(self.web.clone())
    }

    /// Serve both channels until the cancellation token fires.
    pub async fn serve(
        self,
        socket: UnixListener,
        socket_path: std::path::PathBuf,
        http: TcpListener,
    ) -> Result<()> {
        let local_task = tokio::spawn(local::serve(
            socket,
            socket_path,
            Arc::clone(&self.router),
            self.cancel.clone(),
        ));

        let addr = http.local_addr().context("Failed to read bound address")?;
        info!(node.id = self.identity.node_id, %addr, "network channel listening");

        let app = self.web_router();
        let http_result = axum::serve(http, app)
            .with_graceful_shutdown(self.cancel.clone().cancelled_owned())
            .await
            .context("Server error");

        // Either channel stopping takes the whole guard down
        self.cancel.cancel();

        let local_result = local_task.await.context("Local channel task panicked")?;
        if let Err(e) = self.worker.await {
            warn!("executor worker ended abnormally: {}", e);
        }

        http_result?;
        local_result
    }
}

/// Run the guard for `node_id`, owning the process `pid`.
pub async fn run(config: GuardConfig, node_id: u32, pid: u32) -> Result<()> {
    let identity = GuardIdentity::new(node_id);
    info!(
        node.id = node_id,
        pid,
        store = %config.paths.store_dir.display(),
        socket = %config.paths.socket_path.display(),
        http = %config.bind.addr(),
        "snapguard starting"
    );

    let components = Components::from_config(&config)?;
    if config.store.reset_on_start {
        info!(store = %config.paths.store_dir.display(), "resetting snapshot store");
        components
            .store
            .reset()
            .context("Failed to reset snapshot store")?;
    }

    let cancel = CancellationToken::new();
    let guard = Guard::new(
        &config,
        identity,
        Arc::new(TargetProcess::new(pid)),
        components,
        cancel.clone(),
    )?;

    let socket = local::bind(&config.paths.socket_path)?;
    let addr = config.bind.addr();
    let http = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });

    info!("snapguard ready");
    guard
        .serve(socket, config.paths.socket_path.clone(), http)
        .await?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!("Failed to install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
