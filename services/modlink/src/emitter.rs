//! Delta construction and the host bus seam

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::error::{ModlinkError, Result};
use crate::transport::FunctionCode;

/// Host telemetry bus receiving deltas and status reports
pub trait HostBus: Send + Sync + 'static {
    fn handle_delta(&self, delta: Delta) -> Result<()>;

    /// Context id stamped on every delta (e.g. `vessels.self`)
    fn self_context(&self) -> String;

    fn report_status(&self, message: &str);

    fn report_error(&self, message: &str);
}

/// Origin of a value: connection, unit, function code and address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct SourceTag {
    pub connection: String,
    pub unit_id: u8,
    pub function: FunctionCode,
    pub address: u16,
}

impl SourceTag {
    pub fn new(connection: impl Into<String>, unit_id: u8, function: FunctionCode, address: u16) -> Self {
        Self {
            connection: connection.into(),
            unit_id,
            function,
            address,
        }
    }
}

/// `modbus.<host:port>.<unit>.fc<code>.<address>`
impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "modbus.{}.{}.fc{}.{}",
            self.connection,
            self.unit_id,
            self.function.code(),
            self.address
        )
    }
}

impl From<SourceTag> for String {
    fn from(tag: SourceTag) -> Self {
        tag.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathValue {
    pub path: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Update {
    pub source: SourceTag,
    pub timestamp: DateTime<Utc>,
    pub values: Vec<PathValue>,
}

/// Normalized output record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Delta {
    pub context: String,
    pub updates: Vec<Update>,
}

impl Delta {
    /// Single-value delta
    pub fn single(
        context: impl Into<String>,
        path: impl Into<String>,
        value: f64,
        source: SourceTag,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            context: context.into(),
            updates: vec![Update {
                source,
                timestamp,
                values: vec![PathValue {
                    path: path.into(),
                    value,
                }],
            }],
        }
    }
}

/// Builds deltas and hands them to the host bus, one call per value
pub struct DeltaEmitter {
    bus: Arc<dyn HostBus>,
    context: String,
}

impl DeltaEmitter {
    /// Reads the context id from the bus once
    pub fn new(bus: Arc<dyn HostBus>) -> Self {
        let context = bus.self_context();
        Self { bus, context }
    }

    pub fn emit(
        &self,
        path: &str,
        value: f64,
        source: &SourceTag,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let delta = Delta::single(&self.context, path, value, source.clone(), timestamp);
        self.bus.handle_delta(delta)
    }

    pub fn report_error(&self, message: &str) {
        self.bus.report_error(message);
    }
}

impl fmt::Debug for DeltaEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeltaEmitter")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Host bus that prints each delta as one JSON line on stdout
#[derive(Debug, Clone)]
pub struct StdoutBus {
    context: String,
}

impl StdoutBus {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
        }
    }
}

impl HostBus for StdoutBus {
    fn handle_delta(&self, delta: Delta) -> Result<()> {
        let line = serde_json::to_string(&delta).map_err(|e| ModlinkError::emit(e.to_string()))?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", line).map_err(|e| ModlinkError::emit(e.to_string()))?;
        stdout.flush().map_err(|e| ModlinkError::emit(e.to_string()))
    }

    fn self_context(&self) -> String {
        self.context.clone()
    }

    fn report_status(&self, message: &str) {
        info!("Status: {}", message);
    }

    fn report_error(&self, message: &str) {
        error!("Error: {}", message);
    }
}
