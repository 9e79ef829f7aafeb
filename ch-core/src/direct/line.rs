//! Line transport
//!
//! [`Line`] is the smallest seam around the serial port: write one command
//! line, read one reply line. Tests substitute scripted lines for it.

use std::io::{self, BufRead, BufReader, Write};

use ch_error::{ChamberError, Result};
use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use tracing::debug;

use crate::constants::link;

/// A request/response text line to one controller
#[cfg_attr(test, mockall::automock)]
pub trait Line: Send {
    /// Send `line` followed by the terminator
    fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Read one reply line, trimmed
    fn read_line(&mut self) -> io::Result<String>;
}

/// Opens lines by port name
#[cfg_attr(test, mockall::automock)]
pub trait LineOpener: Send + Sync {
    fn open(&self, port: &str) -> Result<Box<dyn Line>>;
}

impl<T: LineOpener + ?Sized> LineOpener for std::sync::Arc<T> {
    fn open(&self, port: &str) -> Result<Box<dyn Line>> {
        (**self).open(port)
    }
}

/// A controller on a local serial port, 19200 8N1 with RTS/CTS handshake
pub struct SerialLine {
    writer: Box<dyn SerialPort>,
    reader: BufReader<Box<dyn SerialPort>>,
}

impl SerialLine {
    pub fn open(port: &str) -> Result<Self> {
        let line_open = |e: serialport::Error| ChamberError::LineOpen {
            port: port.to_string(),
            reason: e.to_string(),
        };

        let writer = serialport::new(port, link::BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::Hardware)
            .timeout(link::TIMEOUT)
            .open()
            .map_err(line_open)?;
        let reader = writer.try_clone().map_err(line_open)?;

        debug!("Opened serial line {} at {} baud", port, link::BAUD_RATE);

        Ok(Self {
            writer,
            reader: BufReader::with_capacity(link::BUFFER_SIZE, reader),
        })
    }
}

impl Line for SerialLine {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut frame = Vec::with_capacity(line.len() + link::TERMINATOR.len());
        frame.extend_from_slice(line.as_bytes());
        frame.extend_from_slice(link::TERMINATOR.as_bytes());
        self.writer.write_all(&frame)?;
        self.writer.flush()
    }

    fn read_line(&mut self) -> io::Result<String> {
        let mut buf = Vec::with_capacity(64);
        let read = self.reader.read_until(b'\n', &mut buf)?;
        if read == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "serial line closed"));
        }
        if buf.len() > link::BUFFER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("reply exceeds {} bytes", link::BUFFER_SIZE),
            ));
        }
        Ok(String::from_utf8_lossy(&buf).trim().to_string())
    }
}

/// Opens [`SerialLine`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialOpener;

impl LineOpener for SerialOpener {
    fn open(&self, port: &str) -> Result<Box<dyn Line>> {
        Ok(Box::new(SerialLine::open(port)?))
    }
}

/// A serial port visible on this machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSummary {
    pub name: String,
    pub kind: String,
    pub description: Option<String>,
}

/// Enumerate the serial ports the OS reports
pub fn available_ports() -> Result<Vec<PortSummary>> {
    let ports = serialport::available_ports().map_err(|e| ChamberError::Io(e.into()))?;

    Ok(ports
        .into_iter()
        .map(|port| {
            let (kind, description) = match port.port_type {
                SerialPortType::UsbPort(info) => (
                    format!("USB {:04x}:{:04x}", info.vid, info.pid),
                    info.product.or(info.manufacturer),
                ),
                SerialPortType::BluetoothPort => ("Bluetooth".to_string(), None),
                SerialPortType::PciPort => ("PCI".to_string(), None),
                SerialPortType::Unknown => ("Unknown".to_string(), None),
            };
            PortSummary {
                name: port.port_name,
                kind,
                description,
            }
        })
        .collect())
}
