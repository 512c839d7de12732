//! CAN transport abstraction
//!
//! The coordinator only needs non-blocking frame in / frame out; the serial
//! implementation accumulates cable bytes and re-frames them.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::constants::timing;
use crate::error::Result;
use crate::frame::{CanFrame, WIRE_LEN};

pub trait CanTransport {
    /// Return the next received frame, if one is complete. Never blocks.
    fn read_frame(&mut self) -> Result<Option<CanFrame>>;

    /// Queue one frame for transmission.
    fn write_frame(&mut self, frame: &CanFrame) -> Result<()>;
}

/// Serial cable transport (K+DCAN style cable in CAN mode).
pub struct SerialCanTransport {
    port: Box<dyn serialport::SerialPort>,
    rx_buf: Vec<u8>,
}

impl SerialCanTransport {
    /// Open the cable and switch it into CAN mode.
    ///
    /// The cable uses the RTS line to select its mode: RTS=0 is the legacy
    /// serial mode, RTS=1 is CAN at 500 kbaud.
    pub fn open(device: &str) -> Result<Self> {
        info!("Opening cable on {}", device);

        let mut port = serialport::new(device, timing::CAN_MODE_BAUD)
            .timeout(Duration::from_millis(1))
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()?;

        port.write_request_to_send(true)?;
        port.clear(serialport::ClearBuffer::All)?;

        info!("CAN mode enabled at {} baud", timing::CAN_MODE_BAUD);

        Ok(Self {
            port,
            rx_buf: Vec::with_capacity(4 * WIRE_LEN),
        })
    }
}

impl CanTransport for SerialCanTransport {
    fn read_frame(&mut self) -> Result<Option<CanFrame>> {
        let available = self.port.bytes_to_read()?;
        if available > 0 {
            let mut chunk = vec![0u8; available as usize];
            match self.port.read(&mut chunk) {
                Ok(n) => self.rx_buf.extend_from_slice(&chunk[..n]),
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(e.into()),
            }
        }

        // Resynchronize on the fixed length byte; a corrupt prefix is skipped
        // one byte at a time until a plausible frame start appears.
        while !self.rx_buf.is_empty() && self.rx_buf[0] as usize != WIRE_LEN {
            warn!("Discarding stray cable byte 0x{:02X}", self.rx_buf[0]);
            self.rx_buf.remove(0);
        }

        if self.rx_buf.len() < WIRE_LEN {
            return Ok(None);
        }

        let frame = CanFrame::from_wire(&self.rx_buf[..WIRE_LEN])?;
        self.rx_buf.drain(..WIRE_LEN);

        debug!("RX ID=0x{:03X}: {:02X?}", frame.id, frame.data);
        Ok(Some(frame))
    }

    fn write_frame(&mut self, frame: &CanFrame) -> Result<()> {
        debug!("TX ID=0x{:03X}: {:02X?}", frame.id, frame.data);
        self.port.write_all(&frame.to_wire())?;
        Ok(())
    }
}

/// In-memory transport for tests.
#[derive(Default)]
pub struct MemoryTransport {
    pub inbound: VecDeque<CanFrame>,
    pub outbound: Vec<CanFrame>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_inbound(&mut self, frame: CanFrame) {
        self.inbound.push_back(frame);
    }
}

impl CanTransport for MemoryTransport {
    fn read_frame(&mut self) -> Result<Option<CanFrame>> {
        Ok(self.inbound.pop_front())
    }

    fn write_frame(&mut self, frame: &CanFrame) -> Result<()> {
        self.outbound.push(*frame);
        Ok(())
    }
}
