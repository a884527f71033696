//! Byte-level channel to a power supply: either a USB serial line or a TCP
//! socket. Exactly one transport is exclusively owned by one session; the
//! variants are matched exhaustively at every I/O call site.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::error::{CaenError, Result};

/// TCP port assigned by the vendor for this product line.
pub const TCP_PORT: u16 = 1470;

/// Serial line rate from the instrument manual; the line is 8N1 with
/// software flow control.
pub const SERIAL_BAUD: u32 = 9600;

pub enum Transport {
    Serial(Box<dyn SerialPort>),
    Tcp(TcpStream),
}

impl Transport {
    /// Open the USB serial line with the settings mandated by the manual.
    pub fn open_serial(port: &str, timeout: Duration) -> Result<Transport> {
        let port = serialport::new(port, SERIAL_BAUD)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::Software)
            .timeout(timeout)
            .open()?;
        Ok(Transport::Serial(port))
    }

    /// Connect to the instrument's Ethernet interface. The instrument always
    /// listens on port 1470; an explicit `host:port` form is accepted so a
    /// protocol simulator can be targeted instead.
    pub fn open_tcp(host: &str, timeout: Duration) -> Result<Transport> {
        let addr = if host.contains(':') {
            host.to_owned()
        } else {
            format!("{}:{}", host, TCP_PORT)
        };
        let stream = TcpStream::connect(addr.as_str())?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        Ok(Transport::Tcp(stream))
    }

    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        match self {
            Transport::Serial(port) => {
                port.write_all(bytes)?;
                port.flush()?;
            }
            Transport::Tcp(stream) => stream.write_all(bytes)?,
        }
        Ok(())
    }

    /// One blocking read of a CRLF-terminated response line, bounded by the
    /// timeout configured at open. Returns the decoded text with line
    /// terminators stripped.
    ///
    /// A window that elapses with no bytes at all yields `Ok("")`: that is
    /// the instrument's documented answer when an absent daisy-chain board is
    /// addressed, and callers must judge it through the success predicate. A
    /// timeout after partial data is a real [`CaenError::CommunicationTimeout`].
    pub fn read_line(&mut self, timeout: Duration) -> Result<String> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let read = match self {
                Transport::Serial(port) => port.read(&mut byte),
                Transport::Tcp(stream) => stream.read(&mut byte),
            };
            match read {
                Ok(0) => break, // peer closed the connection
                Ok(_) => {
                    if byte[0] == b'\n' {
                        break;
                    }
                    line.push(byte[0]);
                }
                Err(err)
                    if err.kind() == ErrorKind::TimedOut
                        || err.kind() == ErrorKind::WouldBlock =>
                {
                    if line.is_empty() {
                        break;
                    }
                    return Err(CaenError::CommunicationTimeout(timeout));
                }
                Err(err) => return Err(err.into()),
            }
        }
        let mut text = String::from_utf8_lossy(&line).into_owned();
        while text.ends_with('\r') || text.ends_with('\n') {
            text.pop();
        }
        Ok(text)
    }
}
