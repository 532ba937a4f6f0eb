//! Register transport: the `RegisterReader` seam consumed by the processor
//! and its Modbus TCP implementation.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tokio_modbus::client::{tcp, Context, Reader};
use tokio_modbus::slave::{Slave, SlaveContext};
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::registry::Batch;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Batch-oriented register transport.
#[async_trait]
pub trait RegisterReader: Send {
    async fn open(&mut self) -> Result<()>;
    async fn close(&mut self);
    fn is_open(&self) -> bool;

    /// Read one batch; the returned slice length equals `batch.count`.
    async fn read(&mut self, batch: &Batch) -> Result<Vec<u16>>;

    /// Log the most recent raw register dump (diagnostic side effect).
    fn log_last_registers(&self);
}

/// Modbus TCP reader for the inverter.
pub struct ModbusReader {
    addr: SocketAddr,
    ctx: Option<Context>,
    last_registers: Option<(&'static str, u16, Vec<u16>)>,
}

impl ModbusReader {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, ctx: None, last_registers: None }
    }
}

#[async_trait]
impl RegisterReader for ModbusReader {
    async fn open(&mut self) -> Result<()> {
        if self.ctx.is_some() {
            return Ok(());
        }
        let connect = tcp::connect(self.addr);
        let ctx = match timeout(CONNECT_TIMEOUT, connect).await {
            Ok(Ok(ctx)) => ctx,
            Ok(Err(e)) => {
                return Err(BridgeError::transport(format!(
                    "Modbus connect to {} failed: {e}",
                    self.addr
                )))
            },
            Err(_) => {
                return Err(BridgeError::timeout(format!(
                    "Modbus connect to {} timed out after {:?}",
                    self.addr, CONNECT_TIMEOUT
                )))
            },
        };
        info!("Modbus connected: {}", self.addr);
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn close(&mut self) {
        if self.ctx.take().is_some() {
            debug!("Modbus connection closed: {}", self.addr);
        }
    }

    fn is_open(&self) -> bool {
        self.ctx.is_some()
    }

    async fn read(&mut self, batch: &Batch) -> Result<Vec<u16>> {
        let ctx = self
            .ctx
            .as_mut()
            .ok_or_else(|| BridgeError::transport("Modbus connection is not open"))?;

        ctx.set_slave(Slave(batch.unit));
        let registers = ctx
            .read_holding_registers(batch.start, batch.count as u16)
            .await
            .map_err(|e| {
                BridgeError::transport(format!("read of batch '{}' failed: {e}", batch.name))
            })?;

        if registers.len() != batch.count {
            return Err(BridgeError::transport(format!(
                "short read of batch '{}': expected {} registers, got {}",
                batch.name,
                batch.count,
                registers.len()
            )));
        }

        self.last_registers = Some((batch.name, batch.start, registers.clone()));
        Ok(registers)
    }

    fn log_last_registers(&self) {
        match &self.last_registers {
            Some((name, start, registers)) => {
                warn!(
                    "raw register dump: batch '{}' @ {}: {:?}",
                    name, start, registers
                );
            },
            None => warn!("raw register dump requested, but nothing was read yet"),
        }
    }
}
