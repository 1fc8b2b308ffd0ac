//! Serial transport
//!
//! The link is half-duplex and shared by both axes, so every request and its
//! reply happen under one lock. A timed-out exchange is repeated (once by
//! default); I/O failures are reported as not-connected straight away.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::error::{MotorError, MotorResult};
use crate::motor::Axis;
use crate::protocol::{self, END_CHAR};

/// Per-read timeout handed to the serial driver; the exchange deadline is
/// enforced on top of it
const PORT_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Byte-level access to the serial device
pub trait SerialLink: Send {
    /// Drop stale bytes waiting in the input buffer
    fn clear_input(&mut self) -> io::Result<()>;

    /// Bytes still queued for transmission
    fn bytes_pending(&mut self) -> io::Result<u32>;

    /// Drive the send-enable (RTS) line
    fn set_send_enable(&mut self, enabled: bool) -> io::Result<()>;

    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read one byte. Fails with `ErrorKind::TimedOut` when nothing arrives.
    fn read_byte(&mut self) -> io::Result<u8>;
}

/// [`SerialLink`] over an OS serial port
pub struct SerialPortLink {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialPortLink {
    pub fn open(path: &str, baud_rate: u32) -> MotorResult<Self> {
        let port = serialport::new(path, baud_rate)
            .timeout(PORT_READ_TIMEOUT)
            .open()?;
        debug!("Opened serial port {} at {} baud", path, baud_rate);
        Ok(Self { port })
    }
}

impl SerialLink for SerialPortLink {
    fn clear_input(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::from)
    }

    fn bytes_pending(&mut self) -> io::Result<u32> {
        self.port.bytes_to_write().map_err(io::Error::from)
    }

    fn set_send_enable(&mut self, enabled: bool) -> io::Result<()> {
        self.port
            .write_request_to_send(enabled)
            .map_err(io::Error::from)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        io::Write::write_all(&mut self.port, data)?;
        io::Write::flush(&mut self.port)
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        match io::Read::read(&mut self.port, &mut buf)? {
            0 => Err(io::Error::new(io::ErrorKind::TimedOut, "no data")),
            _ => Ok(buf[0]),
        }
    }
}

/// Timeout and retry policy for one exchange
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Wait for a complete reply
    pub timeout: Duration,
    /// Extra attempts after a timed-out exchange
    pub retries: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1000),
            retries: 1,
        }
    }
}

/// Shared handle to the serial link. Clones share the same lock.
#[derive(Clone)]
pub struct Transport {
    link: Arc<Mutex<Box<dyn SerialLink>>>,
    config: TransportConfig,
}

impl Transport {
    pub fn new(link: Box<dyn SerialLink>, config: TransportConfig) -> Self {
        Self {
            link: Arc::new(Mutex::new(link)),
            config,
        }
    }

    /// Open a serial port and wrap it
    pub fn open(path: &str, baud_rate: u32, config: TransportConfig) -> MotorResult<Self> {
        Ok(Self::new(Box::new(SerialPortLink::open(path, baud_rate)?), config))
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Send one command to an axis and return the reply payload.
    ///
    /// Runs on the blocking pool so a slow device never stalls the runtime.
    pub async fn send_and_receive(
        &self,
        axis: Axis,
        command: char,
        payload: &str,
    ) -> MotorResult<String> {
        let transport = self.clone();
        let payload = payload.to_string();
        tokio::task::spawn_blocking(move || transport.send_and_receive_blocking(axis, command, &payload))
            .await
            .map_err(|e| MotorError::NotConnected(format!("transport task failed: {}", e)))?
    }

    /// Blocking form of [`send_and_receive`](Self::send_and_receive)
    pub fn send_and_receive_blocking(
        &self,
        axis: Axis,
        command: char,
        payload: &str,
    ) -> MotorResult<String> {
        let mut link = self
            .link
            .lock()
            .map_err(|_| MotorError::NotConnected("transport lock poisoned".to_string()))?;

        let request = protocol::frame(axis, command, payload);
        let attempts = self.config.retries + 1;

        let mut attempt = 1;
        loop {
            match self.exchange(link.as_mut(), axis, &request, attempt) {
                Ok(raw) => return protocol::parse_reply(axis, &raw),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    debug!(
                        "Timeout on {:?} (attempt {}/{}), retrying",
                        request.trim_end(),
                        attempt,
                        attempts
                    );
                    attempt += 1;
                }
                Err(e) => {
                    warn!("Exchange {:?} failed: {}", request.trim_end(), e);
                    return Err(e);
                }
            }
        }
    }

    /// One request/response round trip. A missed deadline is reported as
    /// `NoResponse` after `attempt` attempts.
    fn exchange(&self, link: &mut dyn SerialLink, axis: Axis, request: &str, attempt: u32) -> MotorResult<Vec<u8>> {
        let deadline = Instant::now() + self.config.timeout;
        let timed_out = || MotorError::NoResponse {
            axis,
            attempts: attempt,
        };

        link.clear_input()?;
        while link.bytes_pending()? > 0 {
            if Instant::now() >= deadline {
                return Err(timed_out());
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        trace!("-> {:?}", request);
        link.set_send_enable(true)?;
        let written = link.write_all(request.as_bytes());
        link.set_send_enable(false)?;
        written?;

        let mut reply = Vec::with_capacity(16);
        loop {
            match link.read_byte() {
                Ok(END_CHAR) => break,
                Ok(byte) => reply.push(byte),
                Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return Err(timed_out());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        trace!("<- {:?}", String::from_utf8_lossy(&reply));

        Ok(reply)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_exchange_frames_and_strips() {
        let link = ScriptedLink::new();
        link.reply("=CDAB12");
        let t = transport(&link);

        let reply = t.send_and_receive_blocking(Axis::Ra, 'j', "").unwrap();
        assert_eq!(reply, "CDAB12");
        assert_eq!(link.written(), vec![":j1\r".to_string()]);
        assert_eq!(link.script.lock().unwrap().rts_toggles, 2);
    }

    #[test]
    fn test_timeout_retried_once() {
        let link = ScriptedLink::new();
        link.push(Scripted::Silence);
        link.reply("=");
        let t = transport(&link);

        assert_eq!(t.send_and_receive_blocking(Axis::Dec, 'K', "").unwrap(), "");
        assert_eq!(link.written().len(), 2);
    }

    #[test]
    fn test_second_timeout_is_no_response() {
        let link = ScriptedLink::new();
        link.push(Scripted::Silence);
        link.push(Scripted::Silence);
        link.reply("=");
        let t = transport(&link);

        assert_eq!(
            t.send_and_receive_blocking(Axis::Dec, 'f', ""),
            Err(MotorError::NoResponse {
                axis: Axis::Dec,
                attempts: 2
            })
        );
        assert_eq!(link.written().len(), 2);
    }

    #[test]
    fn test_io_failure_not_retried() {
        let link = ScriptedLink::new();
        link.push(Scripted::IoError);
        link.reply("=");
        let t = transport(&link);

        let result = t.send_and_receive_blocking(Axis::Ra, 'f', "");
        assert!(matches!(result, Err(MotorError::NotConnected(_))));
        assert_eq!(link.written().len(), 1);
    }

    #[test]
    fn test_waits_for_idle_line_before_sending() {
        let link = ScriptedLink::new();
        link.set_tx_backlog(5);
        link.reply("=");
        let t = transport(&link);

        assert_eq!(t.send_and_receive_blocking(Axis::Ra, 'K', "").unwrap(), "");
        assert_eq!(link.tx_backlog(), 0);
        assert_eq!(link.written(), vec![":K1\r".to_string()]);
    }

    #[test]
    fn test_busy_line_times_out() {
        let link = ScriptedLink::new();
        link.set_tx_backlog(1_000_000);
        link.reply("=");
        let t = transport(&link);

        assert_eq!(
            t.send_and_receive_blocking(Axis::Dec, 'j', ""),
            Err(MotorError::NoResponse {
                axis: Axis::Dec,
                attempts: 2
            })
        );
        assert!(link.written().is_empty());
    }

    #[test]
    fn test_controller_fault_surfaces() {
        let link = ScriptedLink::new();
        link.reply("!2");
        let t = transport(&link);
        assert!(matches!(
            t.send_and_receive_blocking(Axis::Ra, 'G', "30"),
            Err(MotorError::Controller { axis: Axis::Ra, .. })
        ));
    }

    #[tokio::test]
    async fn test_async_exchange() {
        let link = ScriptedLink::new();
        link.reply("=0A0000");
        let t = transport(&link);
        assert_eq!(t.send_and_receive(Axis::Ra, 'a', "").await.unwrap(), "0A0000");
    }

    #[tokio::test]
    async fn test_concurrent_exchanges_do_not_interleave() {
        let link = ScriptedLink::new();
        link.set_fallback(|request| Some(format!("={}", &request[1..3])));
        let t = transport(&link);

        let mut handles = Vec::new();
        for i in 0..8 {
            let t = t.clone();
            let axis = if i % 2 == 0 { Axis::Ra } else { Axis::Dec };
            handles.push(tokio::spawn(async move {
                let reply = t.send_and_receive(axis, 'f', "").await.unwrap();
                assert_eq!(reply, format!("f{}", axis.as_char()));
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(link.written().len(), 8);
    }
}
