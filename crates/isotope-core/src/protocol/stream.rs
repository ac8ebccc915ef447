//! Byte channels the transport runs over (serial port or TCP bridge)

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// Abstraction for the physical link to the board.
///
/// Reads must honour the timeout set with [`set_timeout`](Self::set_timeout)
/// and fail with `TimedOut` or `WouldBlock` when nothing arrives, so the
/// reader task can check its stop flag between reads.
pub trait CommunicationChannel: Read + Write + Send {
    /// Set timeout for read/write operations
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Discard anything already buffered on the input side
    fn clear_input_buffer(&mut self) -> io::Result<()>;

    /// Second handle on the same link, used to split reading from writing
    fn try_clone(&self) -> io::Result<Box<dyn CommunicationChannel>>;

    /// Short description for logs
    fn describe(&self) -> String;
}

/// Serial port wrapper implementing CommunicationChannel
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl CommunicationChannel for SerialChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(io::Error::other)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }

    fn try_clone(&self) -> io::Result<Box<dyn CommunicationChannel>> {
        let port_clone = self.port.try_clone().map_err(io::Error::other)?;
        Ok(Box::new(SerialChannel::new(port_clone)))
    }

    fn describe(&self) -> String {
        self.port.name().unwrap_or_else(|| "serial".to_string())
    }
}

/// TCP stream wrapper implementing CommunicationChannel (ser2net style bridges)
pub struct TcpChannel {
    stream: TcpStream,
}

impl TcpChannel {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl Read for TcpChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl CommunicationChannel for TcpChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.stream.set_read_timeout(Some(timeout))?;
        self.stream.set_write_timeout(Some(timeout))?;
        Ok(())
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        // No syscall for this on sockets: drain with a non-blocking read
        self.stream.set_nonblocking(true)?;
        let mut buf = [0u8; 1024];
        let result = loop {
            match self.stream.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.stream.set_nonblocking(false)?;
        result
    }

    fn try_clone(&self) -> io::Result<Box<dyn CommunicationChannel>> {
        let stream_clone = self.stream.try_clone()?;
        Ok(Box::new(TcpChannel::new(stream_clone)))
    }

    fn describe(&self) -> String {
        self.stream
            .peer_addr()
            .map(|addr| format!("tcp://{}", addr))
            .unwrap_or_else(|_| "tcp".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_tcp_channel_clone_shares_link() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        let channel = TcpChannel::new(client);
        let mut writer = channel.try_clone().unwrap();
        writer.write_all(b"hello\n").unwrap();
        writer.flush().unwrap();

        let mut buf = [0u8; 6];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello\n");
        assert!(channel.describe().starts_with("tcp://"));
    }

    #[test]
    fn test_tcp_read_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let _server = listener.accept().unwrap();

        let mut channel = TcpChannel::new(client);
        channel.set_timeout(Duration::from_millis(20)).unwrap();
        let mut buf = [0u8; 8];
        let err = channel.read(&mut buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
        ));
    }
}
