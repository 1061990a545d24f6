//! Test Common Utilities
//!
//! In-memory Modbus servers and a recording host bus for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use modlink::{
    ConnectionConfig, DataType, Delta, FunctionCode, HostBus, MappingConfig, ModbusTransport,
    ModlinkError, Result, SlaveConfig,
};

/// Behaviour of one fake server, keyed by `host:port`
#[derive(Debug, Clone, Default)]
pub struct ServerScript {
    pub refuse: bool,
    pub connect_delay: Duration,
    pub read_delay: Duration,
    /// The first `stalled_reads` requests are never answered in time
    pub stalled_reads: usize,
    /// `(unit, address) -> word`; unset addresses read as 0
    pub registers: HashMap<(u8, u16), u16>,
    /// `(unit, address) -> bit`; unset addresses read as false
    pub coils: HashMap<(u8, u16), bool>,
}

impl ServerScript {
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Default::default()
        }
    }

    pub fn register(mut self, unit: u8, address: u16, word: u16) -> Self {
        self.registers.insert((unit, address), word);
        self
    }

    pub fn coil(mut self, unit: u8, address: u16, bit: bool) -> Self {
        self.coils.insert((unit, address), bit);
        self
    }

    pub fn read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn stall_reads(mut self, count: usize) -> Self {
        self.stalled_reads = count;
        self
    }

    pub fn connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }
}

/// One read request as seen by a fake server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCall {
    pub unit: u8,
    pub function: FunctionCode,
    pub address: u16,
    pub count: u16,
}

#[derive(Debug, Default)]
struct ServerStats {
    connects: usize,
    closes: usize,
    resets: usize,
    reads: Vec<ReadCall>,
    in_flight: usize,
    max_in_flight: usize,
    failing: bool,
}

#[derive(Default)]
struct FakeState {
    scripts: Mutex<HashMap<String, ServerScript>>,
    stats: Mutex<HashMap<String, ServerStats>>,
}

/// Connector over scripted in-memory servers
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<FakeState>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(self, id: &str, script: ServerScript) -> Self {
        self.state
            .scripts
            .lock()
            .unwrap()
            .insert(id.to_string(), script);
        self
    }

    /// Make every subsequent read on `id` fail
    pub fn fail_reads(&self, id: &str, failing: bool) {
        self.stats_mut(id, |s| s.failing = failing);
    }

    pub fn reads(&self, id: &str) -> Vec<ReadCall> {
        self.stats(id, |s| s.reads.clone())
    }

    pub fn read_count(&self, id: &str) -> usize {
        self.stats(id, |s| s.reads.len())
    }

    pub fn connects(&self, id: &str) -> usize {
        self.stats(id, |s| s.connects)
    }

    pub fn closes(&self, id: &str) -> usize {
        self.stats(id, |s| s.closes)
    }

    pub fn resets(&self, id: &str) -> usize {
        self.stats(id, |s| s.resets)
    }

    pub fn max_in_flight(&self, id: &str) -> usize {
        self.stats(id, |s| s.max_in_flight)
    }

    fn stats<R>(&self, id: &str, f: impl FnOnce(&ServerStats) -> R) -> R {
        let mut stats = self.state.stats.lock().unwrap();
        f(stats.entry(id.to_string()).or_default())
    }

    fn stats_mut(&self, id: &str, f: impl FnOnce(&mut ServerStats)) {
        let mut stats = self.state.stats.lock().unwrap();
        f(stats.entry(id.to_string()).or_default());
    }
}

#[async_trait]
impl modlink::Connector for FakeConnector {
    type Transport = FakeTransport;

    async fn connect_tcp(&self, host: &str, port: u16) -> Result<FakeTransport> {
        let id = format!("{}:{}", host, port);
        self.stats_mut(&id, |s| s.connects += 1);

        let script = self.state.scripts.lock().unwrap().get(&id).cloned();
        let Some(script) = script else {
            return Err(ModlinkError::connect(format!("{}: connection refused", id)));
        };
        if !script.connect_delay.is_zero() {
            tokio::time::sleep(script.connect_delay).await;
        }
        if script.refuse {
            return Err(ModlinkError::connect(format!("{}: connection refused", id)));
        }

        Ok(FakeTransport {
            id,
            script,
            connector: self.clone(),
            unit: 0,
            awaiting_reply: false,
            closed: false,
        })
    }
}

pub struct FakeTransport {
    id: String,
    script: ServerScript,
    connector: FakeConnector,
    unit: u8,
    /// A request went out and its reply was never read. Like a real TCP
    /// session, every later request then picks up the previous reply.
    awaiting_reply: bool,
    closed: bool,
}

impl FakeTransport {
    async fn begin(&mut self, function: FunctionCode, address: u16, count: u16) -> Result<()> {
        if self.closed {
            return Err(ModlinkError::read("transport closed"));
        }
        let call = ReadCall {
            unit: self.unit,
            function,
            address,
            count,
        };
        let mut stalled = false;
        self.connector.stats_mut(&self.id, |s| {
            stalled = s.reads.len() < self.script.stalled_reads;
            s.reads.push(call);
            s.in_flight += 1;
            s.max_in_flight = s.max_in_flight.max(s.in_flight);
        });

        if self.awaiting_reply {
            self.connector.stats_mut(&self.id, |s| s.in_flight -= 1);
            return Err(ModlinkError::read(format!(
                "{}: reply does not match request",
                self.id
            )));
        }

        self.awaiting_reply = true;
        if stalled {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        } else if !self.script.read_delay.is_zero() {
            tokio::time::sleep(self.script.read_delay).await;
        }
        self.awaiting_reply = false;

        let mut failing = false;
        self.connector.stats_mut(&self.id, |s| {
            s.in_flight -= 1;
            failing = s.failing;
        });
        if failing {
            return Err(ModlinkError::read(format!("{}: connection reset", self.id)));
        }
        Ok(())
    }

    fn words(&self, address: u16, count: u16) -> Vec<u16> {
        (0..count)
            .map(|i| {
                let addr = address.wrapping_add(i);
                self.script
                    .registers
                    .get(&(self.unit, addr))
                    .copied()
                    .unwrap_or(0)
            })
            .collect()
    }

    fn bits(&self, address: u16, count: u16) -> Vec<bool> {
        (0..count)
            .map(|i| {
                let addr = address.wrapping_add(i);
                self.script
                    .coils
                    .get(&(self.unit, addr))
                    .copied()
                    .unwrap_or(false)
            })
            .collect()
    }
}

#[async_trait]
impl ModbusTransport for FakeTransport {
    fn set_unit_id(&mut self, unit_id: u8) {
        self.unit = unit_id;
    }

    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Vec<bool>> {
        self.begin(FunctionCode::ReadCoils, address, count).await?;
        Ok(self.bits(address, count))
    }

    async fn read_discrete_inputs(&mut self, address: u16, count: u16) -> Result<Vec<bool>> {
        self.begin(FunctionCode::ReadDiscreteInputs, address, count)
            .await?;
        Ok(self.bits(address, count))
    }

    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        self.begin(FunctionCode::ReadHoldingRegisters, address, count)
            .await?;
        Ok(self.words(address, count))
    }

    async fn read_input_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        self.begin(FunctionCode::ReadInputRegisters, address, count)
            .await?;
        Ok(self.words(address, count))
    }

    fn reset(&mut self) {
        let abandoned = std::mem::take(&mut self.awaiting_reply);
        self.connector.stats_mut(&self.id, |s| {
            s.resets += 1;
            if abandoned {
                s.in_flight -= 1;
            }
        });
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.connector.stats_mut(&self.id, |s| s.closes += 1);
        }
        Ok(())
    }
}

/// Host bus that keeps everything it is given
#[derive(Default)]
pub struct RecordingBus {
    deltas: Mutex<Vec<Delta>>,
    statuses: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
    reject: AtomicBool,
}

impl RecordingBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reject_deltas(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn deltas(&self) -> Vec<Delta> {
        self.deltas.lock().unwrap().clone()
    }

    /// Every value emitted for `path`, in order
    pub fn values(&self, path: &str) -> Vec<f64> {
        self.deltas
            .lock()
            .unwrap()
            .iter()
            .flat_map(|d| d.updates.iter())
            .flat_map(|u| u.values.iter())
            .filter(|v| v.path == path)
            .map(|v| v.value)
            .collect()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl HostBus for RecordingBus {
    fn handle_delta(&self, delta: Delta) -> Result<()> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(ModlinkError::emit("bus is full"));
        }
        self.deltas.lock().unwrap().push(delta);
        Ok(())
    }

    fn self_context(&self) -> String {
        "vessels.self".to_string()
    }

    fn report_status(&self, message: &str) {
        self.statuses.lock().unwrap().push(message.to_string());
    }

    fn report_error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}

// ============================================================================
// Config builders
// ============================================================================

pub fn mapping(
    function: FunctionCode,
    address: u16,
    data_type: DataType,
    path: &str,
    expression: &str,
) -> MappingConfig {
    MappingConfig {
        function,
        address,
        data_type,
        path: path.to_string(),
        expression: expression.to_string(),
    }
}

/// Holding register, `uint16`, identity transform
pub fn holding(address: u16, path: &str) -> MappingConfig {
    mapping(
        FunctionCode::ReadHoldingRegisters,
        address,
        DataType::Uint16,
        path,
        "x",
    )
}

pub fn slave(unit_id: u8, mappings: Vec<MappingConfig>) -> SlaveConfig {
    SlaveConfig { unit_id, mappings }
}

/// Connection on port 502 polling every `interval_secs`
pub fn connection(host: &str, interval_secs: f64, slaves: Vec<SlaveConfig>) -> ConnectionConfig {
    let mut config = ConnectionConfig::new(host, 502);
    config.poll_interval = interval_secs;
    config.slaves = slaves;
    config
}
