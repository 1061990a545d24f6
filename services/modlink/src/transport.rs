//! Modbus transport seam
//!
//! The pipeline talks to a [`ModbusTransport`] obtained from a [`Connector`];
//! the production pair is [`TcpConnector`] / [`TcpTransport`] on top of
//! `tokio-modbus`. Tests substitute in-memory fakes.

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_modbus::client::{tcp, Context};
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};

use crate::codec::bits_to_words;
use crate::error::{ModlinkError, Result};

/// Read function codes supported by the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FunctionCode {
    /// Read Coils (0x01)
    ReadCoils,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters,
    /// Read Input Registers (0x04)
    ReadInputRegisters,
}

impl FunctionCode {
    /// Numeric Modbus function code
    pub fn code(&self) -> u8 {
        match self {
            FunctionCode::ReadCoils => 0x01,
            FunctionCode::ReadDiscreteInputs => 0x02,
            FunctionCode::ReadHoldingRegisters => 0x03,
            FunctionCode::ReadInputRegisters => 0x04,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionCode::ReadCoils => "read-coils",
            FunctionCode::ReadDiscreteInputs => "read-discrete-inputs",
            FunctionCode::ReadHoldingRegisters => "read-holding-registers",
            FunctionCode::ReadInputRegisters => "read-input-registers",
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One established Modbus connection
#[async_trait]
pub trait ModbusTransport: Send + 'static {
    /// Select the unit addressed by subsequent reads
    fn set_unit_id(&mut self, unit_id: u8);

    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Vec<bool>>;

    async fn read_discrete_inputs(&mut self, address: u16, count: u16) -> Result<Vec<bool>>;

    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>>;

    async fn read_input_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>>;

    /// Drop the session after a request was abandoned mid-flight, so its late
    /// reply cannot be taken for the answer to the next request. The next read
    /// starts on a fresh session.
    fn reset(&mut self);

    /// Release the connection. Further reads fail.
    async fn close(&mut self) -> Result<()>;
}

/// Opens transports
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: ModbusTransport;

    async fn connect_tcp(&self, host: &str, port: u16) -> Result<Self::Transport>;
}

/// Dispatch a read by function code, returning words.
///
/// Bit reads are widened to `0`/`1` words so they decode like registers.
pub async fn read_words<T>(
    transport: &mut T,
    function: FunctionCode,
    address: u16,
    count: u16,
) -> Result<Vec<u16>>
where
    T: ModbusTransport + ?Sized,
{
    let words = match function {
        FunctionCode::ReadCoils => bits_to_words(&transport.read_coils(address, count).await?),
        FunctionCode::ReadDiscreteInputs => {
            bits_to_words(&transport.read_discrete_inputs(address, count).await?)
        },
        FunctionCode::ReadHoldingRegisters => {
            transport.read_holding_registers(address, count).await?
        },
        FunctionCode::ReadInputRegisters => transport.read_input_registers(address, count).await?,
    };
    Ok(words)
}

// ============================================================================
// tokio-modbus implementation
// ============================================================================

/// Connector for Modbus TCP servers
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Transport = TcpTransport;

    async fn connect_tcp(&self, host: &str, port: u16) -> Result<TcpTransport> {
        let addr = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| ModlinkError::connect(format!("Cannot resolve {}:{}: {}", host, port, e)))?
            .next()
            .ok_or_else(|| {
                ModlinkError::connect(format!("No address found for {}:{}", host, port))
            })?;

        let ctx = tcp::connect(addr)
            .await
            .map_err(|e| ModlinkError::connect(format!("{}: {}", addr, e)))?;

        debug!("Modbus TCP connected: {}", addr);
        Ok(TcpTransport {
            peer: format!("{}:{}", host, port),
            addr,
            unit: None,
            ctx: Some(ctx),
            closed: false,
        })
    }
}

/// `tokio-modbus` client context for one TCP server.
///
/// A failed or reset session is reopened on the next read.
pub struct TcpTransport {
    peer: String,
    addr: SocketAddr,
    unit: Option<u8>,
    ctx: Option<Context>,
    closed: bool,
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("peer", &self.peer)
            .field("open", &self.ctx.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}

impl TcpTransport {
    async fn session(&mut self) -> Result<&mut Context> {
        if self.closed {
            return Err(ModlinkError::read(format!("Transport to {} is closed", self.peer)));
        }
        if self.ctx.is_none() {
            info!("Reconnecting to {}", self.peer);
            let mut ctx = tcp::connect(self.addr)
                .await
                .map_err(|e| ModlinkError::read(format!("Reconnect to {} failed: {}", self.peer, e)))?;
            if let Some(unit) = self.unit {
                ctx.set_slave(Slave(unit));
            }
            self.ctx = Some(ctx);
        }
        let peer = &self.peer;
        self.ctx
            .as_mut()
            .ok_or_else(|| ModlinkError::read(format!("Transport to {} is closed", peer)))
    }

    /// Flatten a `tokio-modbus` response. A transport or protocol error leaves
    /// the session in an unknown state, so it is dropped; an exception
    /// response does not.
    fn response<T>(
        &mut self,
        response: std::result::Result<std::result::Result<T, ExceptionCode>, tokio_modbus::Error>,
    ) -> Result<T> {
        match response {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(exception)) => Err(ModlinkError::read(format!("Exception: {:?}", exception))),
            Err(e) => {
                self.ctx = None;
                Err(ModlinkError::read(format!("{}: {}", self.peer, e)))
            },
        }
    }
}

#[async_trait]
impl ModbusTransport for TcpTransport {
    fn set_unit_id(&mut self, unit_id: u8) {
        self.unit = Some(unit_id);
        if let Some(ctx) = self.ctx.as_mut() {
            ctx.set_slave(Slave(unit_id));
        }
    }

    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Vec<bool>> {
        let response = self.session().await?.read_coils(address, count).await;
        let mut bits = self.response(response)?;
        bits.truncate(count as usize);
        Ok(bits)
    }

    async fn read_discrete_inputs(&mut self, address: u16, count: u16) -> Result<Vec<bool>> {
        let response = self
            .session()
            .await?
            .read_discrete_inputs(address, count)
            .await;
        let mut bits = self.response(response)?;
        bits.truncate(count as usize);
        Ok(bits)
    }

    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        let response = self
            .session()
            .await?
            .read_holding_registers(address, count)
            .await;
        self.response(response)
    }

    async fn read_input_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        let response = self
            .session()
            .await?
            .read_input_registers(address, count)
            .await;
        self.response(response)
    }

    fn reset(&mut self) {
        if self.ctx.take().is_some() {
            debug!("Modbus TCP session to {} dropped", self.peer);
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        let Some(mut ctx) = self.ctx.take() else {
            return Ok(());
        };
        if let Err(e) = ctx.disconnect().await.map(|_| ()) {
            warn!("Modbus disconnect from {} failed: {}", self.peer, e);
            return Err(ModlinkError::io(e.to_string()));
        }
        debug!("Modbus TCP closed: {}", self.peer);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    struct Scripted {
        unit: u8,
        bits: Vec<bool>,
        words: Vec<u16>,
    }

    #[async_trait]
    impl ModbusTransport for Scripted {
        fn set_unit_id(&mut self, unit_id: u8) {
            self.unit = unit_id;
        }

        async fn read_coils(&mut self, _address: u16, count: u16) -> Result<Vec<bool>> {
            Ok(self.bits.iter().copied().take(count as usize).collect())
        }

        async fn read_discrete_inputs(&mut self, _address: u16, _count: u16) -> Result<Vec<bool>> {
            Err(ModlinkError::read("Exception: IllegalDataAddress"))
        }

        async fn read_holding_registers(&mut self, _address: u16, count: u16) -> Result<Vec<u16>> {
            Ok(self.words.iter().copied().take(count as usize).collect())
        }

        async fn read_input_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
            Ok(vec![address; count as usize])
        }

        fn reset(&mut self) {}

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn scripted() -> Scripted {
        Scripted {
            unit: 0,
            bits: vec![true, false, true],
            words: vec![0x4049, 0x0FDB],
        }
    }

    #[test]
    fn test_function_codes() {
        assert_eq!(FunctionCode::ReadCoils.code(), 1);
        assert_eq!(FunctionCode::ReadDiscreteInputs.code(), 2);
        assert_eq!(FunctionCode::ReadHoldingRegisters.code(), 3);
        assert_eq!(FunctionCode::ReadInputRegisters.code(), 4);
    }

    #[test]
    fn test_function_code_wire_names() {
        let parsed: FunctionCode = serde_json::from_str("\"read-holding-registers\"").unwrap();
        assert_eq!(parsed, FunctionCode::ReadHoldingRegisters);
        assert_eq!(FunctionCode::ReadDiscreteInputs.to_string(), "read-discrete-inputs");
        assert!(serde_json::from_str::<FunctionCode>("\"write-coils\"").is_err());
    }

    #[tokio::test]
    async fn test_read_words_dispatch() {
        let mut transport = scripted();
        transport.set_unit_id(7);
        assert_eq!(transport.unit, 7);

        let coils = read_words(&mut transport, FunctionCode::ReadCoils, 0, 1)
            .await
            .unwrap();
        assert_eq!(coils, vec![1]);

        let holding = read_words(&mut transport, FunctionCode::ReadHoldingRegisters, 0, 2)
            .await
            .unwrap();
        assert_eq!(holding, vec![0x4049, 0x0FDB]);

        let input = read_words(&mut transport, FunctionCode::ReadInputRegisters, 40, 1)
            .await
            .unwrap();
        assert_eq!(input, vec![40]);

        let err = read_words(&mut transport, FunctionCode::ReadDiscreteInputs, 0, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ModlinkError::ReadError(_)));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connect_error() {
        // Port 1 on loopback is not expected to run a Modbus server
        let err = TcpConnector.connect_tcp("127.0.0.1", 1).await.unwrap_err();
        assert!(matches!(err, ModlinkError::ConnectError(_)));
    }
}
