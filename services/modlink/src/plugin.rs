//! Plugin controller
//!
//! Fans the configuration out into one [`ConnectionManager`] per server,
//! sets them up concurrently, and owns the root cancellation token. A
//! supervisor task listens for escalated poll failures and stops the whole
//! plugin when one arrives.

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use modlink_calc::ExpressionEngine;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::PluginConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::emitter::{DeltaEmitter, HostBus};
use crate::error::{ModlinkError, Result};
use crate::poll_task::{PollFailure, TaskContext};
use crate::transport::Connector;

/// Aggregate plugin status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginStatus {
    Idle,
    Starting,
    Running,
    Stopped,
    Failed,
}

impl PluginStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PluginStatus::Stopped | PluginStatus::Failed)
    }
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PluginStatus::Idle => "idle",
            PluginStatus::Starting => "starting",
            PluginStatus::Running => "running",
            PluginStatus::Stopped => "stopped",
            PluginStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of [`PluginController::start`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartSummary {
    pub ready: usize,
    pub failed: usize,
    pub tasks: usize,
}

/// Point-in-time view of one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub id: String,
    pub state: ConnectionState,
    pub tasks: usize,
    pub live_tasks: usize,
}

struct Inner<C: Connector, E: ExpressionEngine> {
    connector: C,
    engine: Arc<E>,
    bus: Arc<dyn HostBus>,
    status: watch::Sender<PluginStatus>,
    token: parking_lot::Mutex<CancellationToken>,
    connections: Mutex<Vec<ConnectionManager<C>>>,
}

impl<C: Connector, E: ExpressionEngine> Inner<C, E> {
    fn set_status(&self, status: PluginStatus) {
        self.status.send_replace(status);
        info!("Plugin status: {}", status);
    }

    /// Move to a terminal status once; later calls are no-ops
    fn finish(&self, status: PluginStatus) -> bool {
        let changed = self.status.send_if_modified(|current| {
            if current.is_terminal() {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            info!("Plugin status: {}", status);
            if status == PluginStatus::Stopped {
                self.bus.report_status("Stopped");
            }
        }
        changed
    }

    /// Cancel every timer, tear every connection down, settle on `status`
    async fn shutdown(&self, status: PluginStatus) {
        self.token.lock().cancel();

        let mut connections = self.connections.lock().await;
        for connection in connections.iter_mut() {
            connection.teardown().await;
        }
        drop(connections);

        self.finish(status);
    }
}

/// Plugin lifecycle: `start`, `stop`, `status`
pub struct PluginController<C: Connector, E: ExpressionEngine> {
    inner: Arc<Inner<C, E>>,
}

impl<C: Connector, E: ExpressionEngine> Clone for PluginController<C, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector, E: ExpressionEngine> PluginController<C, E> {
    pub fn new(connector: C, engine: E, bus: Arc<dyn HostBus>) -> Self {
        let (status, _) = watch::channel(PluginStatus::Idle);
        Self {
            inner: Arc::new(Inner {
                connector,
                engine: Arc::new(engine),
                bus,
                status,
                token: parking_lot::Mutex::new(CancellationToken::new()),
                connections: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn status(&self) -> PluginStatus {
        *self.inner.status.borrow()
    }

    /// Resolve once the plugin is stopped or failed
    pub async fn wait_stopped(&self) {
        let mut rx = self.inner.status.subscribe();
        if rx.wait_for(PluginStatus::is_terminal).await.is_err() {
            warn!("Status channel closed while waiting for stop");
        }
    }

    pub async fn connections(&self) -> Vec<ConnectionSnapshot> {
        self.inner
            .connections
            .lock()
            .await
            .iter()
            .map(|c| ConnectionSnapshot {
                id: c.id().to_string(),
                state: c.state(),
                tasks: c.task_count(),
                live_tasks: c.live_task_count(),
            })
            .collect()
    }

    /// Set up every connection concurrently and start polling.
    ///
    /// Connections that fail are reported and skipped. The start fails only
    /// when none reached `Ready`.
    pub async fn start(&self, config: PluginConfig) -> Result<StartSummary> {
        let inner = &self.inner;
        let mut connections = inner.connections.lock().await;

        if matches!(self.status(), PluginStatus::Starting | PluginStatus::Running) {
            return Err(ModlinkError::config("Plugin is already running"));
        }
        if let Err(e) = config.validate() {
            error!("Invalid configuration: {}", e);
            inner.bus.report_error(&e.to_string());
            inner.set_status(PluginStatus::Failed);
            return Err(e);
        }

        let token = CancellationToken::new();
        *inner.token.lock() = token.clone();
        inner.set_status(PluginStatus::Starting);
        inner.bus.report_status("Starting");

        let (failures, failure_rx) = mpsc::unbounded_channel();
        let ctx = TaskContext {
            engine: Arc::clone(&inner.engine),
            emitter: Arc::new(DeltaEmitter::new(Arc::clone(&inner.bus))),
            policy: config.on_poll_error,
            failures,
        };

        let total = config.connections.len();
        info!(
            "Starting {} connection(s), {} mapping(s)",
            total,
            config.mapping_count()
        );
        let mut managers: Vec<ConnectionManager<C>> = config
            .connections
            .into_iter()
            .map(|c| ConnectionManager::new(c, &token))
            .collect();

        let setups: Vec<_> = managers
            .iter_mut()
            .map(|manager| manager.setup(&inner.connector, &ctx))
            .collect();
        let results = join_all(setups).await;
        drop(ctx);

        let mut summary = StartSummary::default();
        for (manager, result) in managers.iter().zip(results) {
            match result {
                Ok(tasks) if manager.state() == ConnectionState::Ready => {
                    summary.ready += 1;
                    summary.tasks += tasks;
                },
                Ok(_) => {},
                Err(e) => {
                    summary.failed += 1;
                    inner.bus.report_error(&format!("{}: {}", manager.id(), e));
                },
            }
        }
        *connections = managers;

        if token.is_cancelled() {
            info!("Stop requested during start");
            for connection in connections.iter_mut() {
                connection.teardown().await;
            }
            inner.finish(PluginStatus::Stopped);
            return Ok(summary);
        }

        if summary.ready == 0 {
            token.cancel();
            for connection in connections.iter_mut() {
                connection.teardown().await;
            }
            let err = ModlinkError::connect(format!(
                "No connection could be established ({} configured)",
                total
            ));
            error!("{}", err);
            inner.bus.report_error(&err.to_string());
            inner.finish(PluginStatus::Failed);
            return Err(err);
        }

        tokio::spawn(supervise(Arc::clone(inner), token, failure_rx));

        if summary.failed > 0 {
            warn!("{} of {} connection(s) failed", summary.failed, total);
        }
        inner.set_status(PluginStatus::Running);
        inner.bus.report_status(&format!(
            "Running: {}/{} connection(s), {} poll task(s)",
            summary.ready, total, summary.tasks
        ));
        Ok(summary)
    }

    /// Tear everything down. Safe to call repeatedly and before `start`.
    pub async fn stop(&self) {
        info!("Stopping plugin");
        self.inner.shutdown(PluginStatus::Stopped).await;
    }
}

/// Stop the plugin on the first escalated poll failure.
///
/// Failures queued behind the first one are reported too before teardown.
async fn supervise<C: Connector, E: ExpressionEngine>(
    inner: Arc<Inner<C, E>>,
    token: CancellationToken,
    mut failures: mpsc::UnboundedReceiver<PollFailure>,
) {
    let first = tokio::select! {
        () = token.cancelled() => None,
        failure = failures.recv() => failure,
    };
    let Some(first) = first else {
        return;
    };

    error!(
        "Stopping plugin after poll failure on {} ({})",
        first.source, first.path
    );
    report_failure(&*inner.bus, &first);
    while let Ok(failure) = failures.try_recv() {
        report_failure(&*inner.bus, &failure);
    }
    inner.shutdown(PluginStatus::Stopped).await;
}

fn report_failure(bus: &dyn HostBus, failure: &PollFailure) {
    bus.report_error(&format!(
        "{} ({}): {}",
        failure.source, failure.path, failure.error
    ));
}
