//! One-shot sender: connect, write one frame, close

use crate::protocol::{Protocol, ProtocolError, CENTER_BATCH_COMMAND};
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Errors that can occur while sending a frame
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: SocketAddr, timeout: Duration },

    #[error("Connection error: {0}")]
    Connection(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Failed to read {path}: {source}")]
    Source { path: String, source: io::Error },
}

/// Configuration for the sender
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Upper bound on a single connection attempt
    pub connect_timeout: Duration,
    /// Time the connection is held open after the final flush
    pub drain_delay: Duration,
    /// TCP no-delay setting
    pub tcp_nodelay: bool,
    /// Write timeout
    pub write_timeout: Option<Duration>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            drain_delay: Duration::from_millis(30),
            tcp_nodelay: true,
            write_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Sends frames, one fresh connection per call
#[derive(Debug, Clone, Default)]
pub struct FileSender {
    config: SenderConfig,
    protocol: Protocol,
}

impl FileSender {
    pub fn new(config: SenderConfig) -> Self {
        Self {
            config,
            protocol: Protocol::default(),
        }
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Send an in-memory payload under `name`
    pub fn send<A: ToSocketAddrs>(
        &self,
        addr: A,
        name: &str,
        payload: &[u8],
    ) -> Result<(), NetworkError> {
        let stream = self.connect(addr)?;
        let mut writer = BufWriter::new(&stream);
        self.protocol.write_frame(&mut writer, name, payload)?;
        drop(writer);

        debug!("Sent '{}' ({} payload bytes)", name, payload.len());
        self.finish(stream);
        Ok(())
    }

    /// Send a reserved command; the payload length field is written as zero
    pub fn send_command<A: ToSocketAddrs>(&self, addr: A, name: &str) -> Result<(), NetworkError> {
        info!("Sending command {}", name);
        self.send(addr, name, &[])
    }

    /// Send the centre command understood by the default receiver
    pub fn send_center_command<A: ToSocketAddrs>(&self, addr: A) -> Result<(), NetworkError> {
        self.send_command(addr, CENTER_BATCH_COMMAND)
    }

    /// Stream a file from disk, named after its final path component
    pub fn send_file<A: ToSocketAddrs>(&self, addr: A, path: &Path) -> Result<u64, NetworkError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| NetworkError::Source {
                path: path.display().to_string(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "path has no UTF-8 file name"),
            })?
            .to_string();

        let source_err = |source: io::Error| NetworkError::Source {
            path: path.display().to_string(),
            source,
        };
        let file = File::open(path).map_err(source_err)?;
        let len = file.metadata().map_err(source_err)?.len();

        let stream = self.connect(addr)?;
        let mut writer = BufWriter::new(&stream);
        self.protocol.write_header(&mut writer, &name, len)?;

        // The header promised `len` bytes; a file that shrinks underneath us
        // must not produce a short frame the receiver would wait on forever.
        let copied = io::copy(&mut file.take(len), &mut writer)?;
        if copied != len {
            return Err(source_err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("file shrank while sending: expected {len} bytes, read {copied}"),
            )));
        }
        writer.flush()?;
        drop(writer);

        info!("Sent {} ({} bytes)", name, len);
        self.finish(stream);
        Ok(len)
    }

    fn connect<A: ToSocketAddrs>(&self, addr: A) -> Result<TcpStream, NetworkError> {
        let addrs: Vec<SocketAddr> = addr.to_socket_addrs()?.collect();
        if addrs.is_empty() {
            return Err(NetworkError::InvalidAddress("No valid address".to_string()));
        }

        let mut last_error = None;
        for socket_addr in addrs {
            trace!("Connecting to {}", socket_addr);
            match TcpStream::connect_timeout(&socket_addr, self.config.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(self.config.tcp_nodelay)?;
                    stream.set_write_timeout(self.config.write_timeout)?;
                    debug!("Connected to {}", socket_addr);
                    return Ok(stream);
                }
                Err(e) => {
                    last_error = Some(connect_error(e, socket_addr, self.config.connect_timeout))
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| NetworkError::InvalidAddress("No valid address".to_string())))
    }

    /// Hold the connection briefly so in-flight bytes are not cut off, then close
    fn finish(&self, stream: TcpStream) {
        if !self.config.drain_delay.is_zero() {
            thread::sleep(self.config.drain_delay);
        }
        if let Err(e) = stream.shutdown(Shutdown::Both) {
            // The peer may already have closed after reading the full frame
            trace!("Shutdown after send: {}", e);
        }
    }
}

fn connect_error(error: io::Error, addr: SocketAddr, timeout: Duration) -> NetworkError {
    match error.kind() {
        io::ErrorKind::TimedOut => NetworkError::ConnectTimeout { addr, timeout },
        _ => NetworkError::Connection(error),
    }
}

/// Send one frame with the default configuration
pub fn send<A: ToSocketAddrs>(addr: A, name: &str, payload: &[u8]) -> Result<(), NetworkError> {
    FileSender::default().send(addr, name, payload)
}

/// Send several files in order, pausing between them
///
/// Stops at the first failure and returns it together with the number of
/// files that were sent before it.
pub fn send_batch<A, P>(
    sender: &FileSender,
    addr: A,
    paths: &[P],
    pause: Duration,
) -> Result<usize, (usize, NetworkError)>
where
    A: ToSocketAddrs + Clone,
    P: AsRef<Path>,
{
    for (sent, path) in paths.iter().enumerate() {
        if sent > 0 && !pause.is_zero() {
            thread::sleep(pause);
        }
        if let Err(e) = sender.send_file(addr.clone(), path.as_ref()) {
            warn!("Batch stopped at {}: {}", path.as_ref().display(), e);
            return Err((sent, e));
        }
    }
    Ok(paths.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_sender_config_default() {
        let config = SenderConfig::default();
        assert!(config.tcp_nodelay);
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.drain_delay, Duration::from_millis(30));
    }

    #[test]
    fn test_sender_connect_fail() {
        // Nothing listens on port 0
        let result = send("127.0.0.1:0", "x.obj", b"");
        assert!(result.is_err());
    }

    #[test]
    fn test_send_writes_complete_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let reader = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut bytes = Vec::new();
            stream.read_to_end(&mut bytes).unwrap();
            bytes
        });

        send(addr, "hello.obj", b"v 1 2 3\n").unwrap();
        let bytes = reader.join().unwrap();

        let expected = Protocol::default()
            .encode("hello.obj", b"v 1 2 3\n")
            .unwrap();
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_send_file_streams_from_disk() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quad.obj");
        let contents = b"v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n";
        std::fs::write(&path, contents).unwrap();

        let reader = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            Protocol::default().decode(&mut stream).unwrap()
        });

        let sent = FileSender::default().send_file(addr, &path).unwrap();
        assert_eq!(sent, contents.len() as u64);

        let decoded = reader.join().unwrap();
        assert_eq!(
            decoded,
            crate::protocol::DecodedFrame::File(crate::protocol::Frame::new(
                "quad.obj",
                contents.to_vec()
            ))
        );
    }

    #[test]
    fn test_connect_timeout_is_reported() {
        let addr: SocketAddr = "10.255.255.1:12345".parse().unwrap();
        let timeout = Duration::from_millis(250);

        let error = connect_error(io::Error::from(io::ErrorKind::TimedOut), addr, timeout);
        match error {
            NetworkError::ConnectTimeout {
                addr: reported,
                timeout: waited,
            } => {
                assert_eq!(reported, addr);
                assert_eq!(waited, timeout);
            }
            other => panic!("expected ConnectTimeout, got {other:?}"),
        }

        let refused = connect_error(
            io::Error::from(io::ErrorKind::ConnectionRefused),
            addr,
            timeout,
        );
        assert!(matches!(refused, NetworkError::Connection(_)));
    }

    #[test]
    fn test_send_missing_file() {
        let result =
            FileSender::default().send_file("127.0.0.1:1", Path::new("/nonexistent/a.obj"));
        assert!(matches!(result, Err(NetworkError::Source { .. })));
    }
}
