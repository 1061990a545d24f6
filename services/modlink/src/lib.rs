//! modlink - Modbus TCP polling bridge
//!
//! Polls one or more Modbus TCP servers on independent schedules, decodes the
//! register words into numbers, applies a per-mapping transform expression
//! and hands each result to a host telemetry bus as a timestamped delta.
//!
//! # Architecture
//!
//! ```text
//! PluginConfig ──► PluginController ──► ConnectionManager (one per server)
//!                                             │
//!                                             ├── transport (shared, behind a mutex)
//!                                             └── PollTask (one per mapping)
//!                                                   read ─► decode ─► evaluate ─► emit
//! ```
//!
//! - **`codec`**: register word decoding (`uint16` .. `float32`)
//! - **`transport`**: `ModbusTransport` / `Connector` seam, `tokio-modbus` client
//! - **`config`**: serde configuration types and validation
//! - **`emitter`**: `Delta` records and the `HostBus` seam
//! - **`poll_task`**: per-mapping poll loop
//! - **`connection`**: per-server lifecycle
//! - **`plugin`**: fan-out, aggregation, fatal-error supervision
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use modlink::{PluginConfig, PluginController, StdoutBus, TcpConnector};
//! use modlink_calc::CalcEngine;
//!
//! # async fn run() -> modlink::Result<()> {
//! let config = PluginConfig::load(std::path::Path::new("config/modlink.yaml"))?;
//! let plugin = PluginController::new(
//!     TcpConnector,
//!     CalcEngine::new(),
//!     Arc::new(StdoutBus::new("vessels.self")),
//! );
//! plugin.start(config).await?;
//! plugin.wait_stopped().await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod emitter;
pub mod error;
pub mod plugin;
pub mod poll_task;
pub mod transport;

pub use codec::DataType;
pub use config::{ConnectionConfig, MappingConfig, PluginConfig, PollErrorPolicy, SlaveConfig};
pub use connection::{compile_mappings, ConnectionManager, ConnectionState};
pub use emitter::{Delta, DeltaEmitter, HostBus, PathValue, SourceTag, StdoutBus, Update};
pub use error::{ModlinkError, Result};
pub use plugin::{ConnectionSnapshot, PluginController, PluginStatus, StartSummary};
pub use transport::{Connector, FunctionCode, ModbusTransport, TcpConnector, TcpTransport};
