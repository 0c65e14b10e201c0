//! Field-bus transport: an async "read N registers at address A" primitive.

use std::time::Duration;

use tokio_modbus::client::{Context, Reader};
use tokio_modbus::prelude::*;
use tracing::debug;

use crate::config::SerialConfig;

/// Error type for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Read failed: {0}")]
    Read(String),
    #[error("Read timed out after {0:?}")]
    Timeout(Duration),
}

/// The read primitive the poll scheduler drives.
///
/// `&mut self` encodes the one-outstanding-request discipline of a shared
/// serial line; the scheduler owns the source exclusively.
pub trait RegisterSource {
    fn read_registers(
        &mut self,
        start: u16,
        count: u16,
    ) -> impl Future<Output = Result<Vec<u16>, TransportError>> + Send;
}

/// Modbus RTU register source over a serial line.
///
/// The serial context is opened lazily on the first read and dropped on any
/// failure, so the next cycle reconnects from scratch instead of polling a
/// wedged line.
pub struct ModbusRtuSource {
    serial: SerialConfig,
    timeout: Duration,
    ctx: Option<Context>,
}

impl ModbusRtuSource {
    pub fn new(serial: SerialConfig) -> Self {
        let timeout = Duration::from_millis(serial.timeout_ms);
        Self {
            serial,
            timeout,
            ctx: None,
        }
    }

    fn open(&self) -> Result<Context, TransportError> {
        let parity = match self.serial.parity.to_lowercase().as_str() {
            "even" => tokio_serial::Parity::Even,
            "odd" => tokio_serial::Parity::Odd,
            _ => tokio_serial::Parity::None,
        };

        let stop_bits = match self.serial.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };

        let data_bits = match self.serial.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };

        let builder = tokio_serial::new(&self.serial.port, self.serial.baud_rate)
            .parity(parity)
            .stop_bits(stop_bits)
            .data_bits(data_bits);

        let serial = tokio_serial::SerialStream::open(&builder)
            .map_err(|e| TransportError::Connection(format!("Serial open failed: {}", e)))?;

        debug!(port = %self.serial.port, "Opened serial line");
        Ok(rtu::attach_slave(serial, Slave(self.serial.slave_id)))
    }
}

impl RegisterSource for ModbusRtuSource {
    async fn read_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>, TransportError> {
        // The context is kept only across successful reads; any failure
        // drops it so the next read reopens the line.
        let mut ctx = match self.ctx.take() {
            Some(ctx) => ctx,
            None => self.open()?,
        };

        let outcome = tokio::time::timeout(self.timeout, ctx.read_holding_registers(start, count))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .map_err(|e| TransportError::Read(e.to_string()))?
            .map_err(|e| TransportError::Read(format!("Exception: {:?}", e)));

        match outcome {
            Ok(values) => {
                self.ctx = Some(ctx);
                Ok(values)
            }
            Err(e) => Err(e),
        }
    }
}
