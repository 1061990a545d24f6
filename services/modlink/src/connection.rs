//! Connection lifecycle
//!
//! A [`ConnectionManager`] owns one transport and the poll tasks reading
//! through it. Its cancellation token is a child of the plugin's, and every
//! poll task gets a child of the connection's, so cancelling either level
//! stops exactly the timers below it.

use std::fmt;
use std::sync::Arc;

use modlink_calc::ExpressionEngine;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{ModlinkError, Result};
use crate::poll_task::{CompiledMapping, PollTask, TaskContext};
use crate::transport::{Connector, ModbusTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Ready,
    Failed,
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Failed => "failed",
            ConnectionState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Compile every expression of a connection, failing on the first bad one
pub fn compile_mappings<E: ExpressionEngine>(
    engine: &E,
    config: &ConnectionConfig,
) -> Result<Vec<CompiledMapping<E::Compiled>>> {
    config
        .mappings()
        .map(|(unit_id, mapping)| {
            let compiled = engine.compile(&mapping.expression).map_err(|e| {
                ModlinkError::compile(format!(
                    "{} slave {} address {} ({}): {}",
                    config.id(),
                    unit_id,
                    mapping.address,
                    mapping.path,
                    e
                ))
            })?;
            Ok(CompiledMapping {
                unit_id,
                mapping: mapping.clone(),
                compiled,
            })
        })
        .collect()
}

pub struct ConnectionManager<C: Connector> {
    id: String,
    config: ConnectionConfig,
    state: ConnectionState,
    token: CancellationToken,
    transport: Option<Arc<Mutex<C::Transport>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(config: ConnectionConfig, parent: &CancellationToken) -> Self {
        Self {
            id: config.id(),
            config,
            state: ConnectionState::Connecting,
            token: parent.child_token(),
            transport: None,
            tasks: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Poll tasks started by the last successful setup
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Poll tasks whose tokio task has not finished yet
    pub fn live_task_count(&self) -> usize {
        self.tasks.iter().filter(|h| !h.is_finished()).count()
    }

    /// Connect, compile, and start one poll task per mapping.
    ///
    /// Returns the number of tasks started. Cancellation while connecting is
    /// not an error: the manager ends up `Stopped` with no tasks.
    pub async fn setup<E: ExpressionEngine>(
        &mut self,
        connector: &C,
        ctx: &TaskContext<E>,
    ) -> Result<usize> {
        self.state = ConnectionState::Connecting;
        info!("Connecting to {}", self.id);

        let token = self.token.clone();
        let timeout = self.config.timeout();
        let connect = tokio::time::timeout(
            timeout,
            connector.connect_tcp(&self.config.host, self.config.port),
        );
        let outcome = tokio::select! {
            () = token.cancelled() => None,
            result = connect => Some(result),
        };

        let mut transport = match outcome {
            None => {
                debug!("Setup of {} cancelled while connecting", self.id);
                self.state = ConnectionState::Stopped;
                return Ok(0);
            },
            Some(Ok(Ok(transport))) => transport,
            Some(Ok(Err(e))) => {
                error!("Connection to {} failed: {}", self.id, e);
                self.state = ConnectionState::Failed;
                return Err(e);
            },
            Some(Err(_)) => {
                error!("Connection to {} timed out", self.id);
                self.state = ConnectionState::Failed;
                return Err(ModlinkError::connect(format!(
                    "{}: timed out after {} ms",
                    self.id, self.config.timeout_ms
                )));
            },
        };

        let compiled = match compile_mappings(&*ctx.engine, &self.config) {
            Ok(compiled) => compiled,
            Err(e) => {
                error!("{}", e);
                close_quietly(&self.id, &mut transport).await;
                self.state = ConnectionState::Failed;
                return Err(e);
            },
        };

        if self.token.is_cancelled() {
            close_quietly(&self.id, &mut transport).await;
            self.state = ConnectionState::Stopped;
            return Ok(0);
        }

        let transport = Arc::new(Mutex::new(transport));
        let period = self.config.poll_interval();
        for entry in compiled {
            let task = PollTask::new(
                &self.id,
                entry,
                Arc::clone(&transport),
                timeout,
                ctx.clone(),
            );
            debug!("Starting poll task {}", task.source());
            self.tasks.push(task.spawn(period, self.token.child_token()));
        }
        self.transport = Some(transport);
        self.state = ConnectionState::Ready;

        info!(
            "Connection {} ready: {} poll task(s) every {:?}",
            self.id,
            self.tasks.len(),
            period
        );
        Ok(self.tasks.len())
    }

    /// Cancel every owned poll task and close the transport.
    ///
    /// Idempotent. Tasks get one connection timeout to finish an in-flight
    /// read before they are aborted.
    pub async fn teardown(&mut self) {
        self.token.cancel();

        let grace = self.config.timeout();
        for mut handle in self.tasks.drain(..) {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                warn!("Poll task on {} did not stop in time, aborting", self.id);
                handle.abort();
            }
        }

        if let Some(transport) = self.transport.take() {
            let mut transport = transport.lock().await;
            close_quietly(&self.id, &mut *transport).await;
        }

        if self.state != ConnectionState::Failed && self.state != ConnectionState::Stopped {
            info!("Connection {} stopped", self.id);
            self.state = ConnectionState::Stopped;
        }
    }
}

impl<C: Connector> fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

async fn close_quietly<T: ModbusTransport + ?Sized>(id: &str, transport: &mut T) {
    if let Err(e) = transport.close().await {
        warn!("Closing {} failed: {}", id, e);
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::codec::DataType;
    use crate::config::{MappingConfig, SlaveConfig};
    use crate::transport::FunctionCode;
    use modlink_calc::CalcEngine;

    fn config_with(expressions: &[&str]) -> ConnectionConfig {
        let mut config = ConnectionConfig::new("plc", 502);
        config.slaves.push(SlaveConfig {
            unit_id: 2,
            mappings: expressions
                .iter()
                .enumerate()
                .map(|(i, expr)| MappingConfig {
                    function: FunctionCode::ReadInputRegisters,
                    address: i as u16,
                    data_type: DataType::Uint16,
                    path: format!("tanks.fuel.{}.currentLevel", i),
                    expression: (*expr).to_string(),
                })
                .collect(),
        });
        config
    }

    #[test]
    fn test_compile_mappings_keeps_order() {
        let config = config_with(&["x", "x * 2"]);
        let compiled = compile_mappings(&CalcEngine::new(), &config).unwrap();
        assert_eq!(compiled.len(), 2);
        assert_eq!(compiled[1].unit_id, 2);
        assert_eq!(compiled[1].mapping.address, 1);
        assert_eq!(compiled[1].compiled.source(), "x * 2");
    }

    #[test]
    fn test_compile_mappings_names_the_bad_mapping() {
        let config = config_with(&["x", "x * (", "x"]);
        let err = compile_mappings(&CalcEngine::new(), &config).unwrap_err();
        match err {
            ModlinkError::ExpressionCompileError(msg) => {
                assert!(msg.contains("plc:502 slave 2 address 1"));
                assert!(msg.contains("tanks.fuel.1.currentLevel"));
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Ready.to_string(), "ready");
        assert_eq!(ConnectionState::Failed.to_string(), "failed");
    }
}
