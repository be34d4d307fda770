//! Receiver: polling accept loop with one handler thread per connection

use crate::protocol::{
    FrameHeader, Protocol, ProtocolError, CENTER_BATCH_COMMAND, CHUNK_SIZE, DEFAULT_MAX_NAME_LEN,
    DEFAULT_MAX_PAYLOAD_LEN,
};
use crate::queue::{event_queue, EventReceiver, EventSender};
use crate::types::TransferEvent;

use std::io::{self, BufReader, BufWriter, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Errors that can occur during receive operations
#[derive(Error, Debug)]
pub enum ReceiveError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Bind error: {0}")]
    Bind(String),

    #[error("Invalid file name: {0:?}")]
    InvalidName(String),

    #[error("Failed to write {path}: {source}")]
    IoFailure { path: PathBuf, source: io::Error },

    #[error("Failed to start connection handler: {0}")]
    Spawn(io::Error),
}

/// Configuration for the receiver
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// How long the accept loop sleeps when no connection is pending
    pub poll_interval: Duration,
    /// Maximum accepted name length in bytes
    pub max_name_len: usize,
    /// Maximum accepted payload length in bytes
    pub max_payload_len: u64,
    /// TCP no-delay setting
    pub tcp_nodelay: bool,
    /// Read timeout for connections; `None` lets slow transfers continue indefinitely
    pub read_timeout: Option<Duration>,
    /// Reserved names treated as commands rather than file names
    pub commands: Vec<String>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            max_name_len: DEFAULT_MAX_NAME_LEN,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            tcp_nodelay: true,
            read_timeout: None,
            commands: vec![CENTER_BATCH_COMMAND.to_string()],
        }
    }
}

impl ReceiverConfig {
    fn protocol(&self) -> Protocol {
        self.commands.iter().fold(
            Protocol::new()
                .with_max_name_len(self.max_name_len)
                .with_max_payload_len(self.max_payload_len),
            |protocol, command| protocol.with_command(command.clone()),
        )
    }
}

/// Maps a declared file name to the path it is stored under
pub trait StorageResolver: Send + Sync + 'static {
    fn resolve(&self, name: &str) -> Result<PathBuf, ReceiveError>;
}

/// Stores every file directly inside one directory, under its declared name
///
/// Later transfers with the same name overwrite earlier ones.
#[derive(Debug, Clone)]
pub struct DirectoryStorage {
    base: PathBuf,
}

impl DirectoryStorage {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}

impl StorageResolver for DirectoryStorage {
    fn resolve(&self, name: &str) -> Result<PathBuf, ReceiveError> {
        validate_file_name(name)?;
        std::fs::create_dir_all(&self.base).map_err(|source| ReceiveError::IoFailure {
            path: self.base.clone(),
            source,
        })?;
        Ok(self.base.join(name))
    }
}

/// Accept only a single plain path component
fn validate_file_name(name: &str) -> Result<(), ReceiveError> {
    let mut components = Path::new(name).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if name.is_empty() || name.contains('\0') || name.contains(['/', '\\']) || !single_normal {
        return Err(ReceiveError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Counters shared between the accept loop and its handlers
#[derive(Debug, Default)]
struct StatsCounters {
    connections: AtomicU64,
    files_stored: AtomicU64,
    bytes_stored: AtomicU64,
    commands: AtomicU64,
    failures: AtomicU64,
}

/// Statistics about received data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub connections: u64,
    pub files_stored: u64,
    pub bytes_stored: u64,
    pub commands: u64,
    pub failures: u64,
}

/// Everything a connection handler needs, shared by reference count
struct HandlerContext {
    protocol: Protocol,
    storage: Arc<dyn StorageResolver>,
    events: EventSender,
    stats: Arc<StatsCounters>,
    tcp_nodelay: bool,
    read_timeout: Option<Duration>,
}

/// TCP file receiver, not yet running
pub struct FileReceiver {
    listener: TcpListener,
    config: ReceiverConfig,
    storage: Arc<dyn StorageResolver>,
}

impl FileReceiver {
    /// Bind with default configuration, storing files in `storage_dir`
    pub fn bind<A: ToSocketAddrs>(
        addr: A,
        storage_dir: impl Into<PathBuf>,
    ) -> Result<Self, ReceiveError> {
        Self::bind_with_config(
            addr,
            ReceiverConfig::default(),
            DirectoryStorage::new(storage_dir),
        )
    }

    /// Bind with custom configuration and storage
    pub fn bind_with_config<A: ToSocketAddrs, S: StorageResolver>(
        addr: A,
        config: ReceiverConfig,
        storage: S,
    ) -> Result<Self, ReceiveError> {
        let listener = TcpListener::bind(addr)
            .map_err(|e| ReceiveError::Bind(format!("Failed to bind: {e}")))?;

        // Polling accept so the loop can observe shutdown
        listener.set_nonblocking(true)?;

        info!("File receiver listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            config,
            storage: Arc::new(storage),
        })
    }

    /// Get the local address the receiver is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, ReceiveError> {
        Ok(self.listener.local_addr()?)
    }

    /// Start the accept loop on a background thread, publishing into `events`
    pub fn spawn(self, events: EventSender) -> Result<ReceiverHandle, ReceiveError> {
        let local_addr = self.listener.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(StatsCounters::default());

        let context = Arc::new(HandlerContext {
            protocol: self.config.protocol(),
            storage: self.storage,
            events,
            stats: stats.clone(),
            tcp_nodelay: self.config.tcp_nodelay,
            read_timeout: self.config.read_timeout,
        });

        let listener = self.listener;
        let poll_interval = self.config.poll_interval;
        let flag = shutdown.clone();
        let thread = thread::Builder::new()
            .name("meshdrop-accept".to_string())
            .spawn(move || accept_loop(listener, poll_interval, flag, context))
            .map_err(ReceiveError::Spawn)?;

        Ok(ReceiverHandle {
            local_addr,
            shutdown,
            stats,
            thread: Some(thread),
        })
    }

    /// Start receiver in a background thread with its own event queue
    pub fn run_async(self) -> Result<(EventReceiver, ReceiverHandle), ReceiveError> {
        let (tx, rx) = event_queue();
        let handle = self.spawn(tx)?;
        Ok((rx, handle))
    }
}

/// Handle to a running receiver
///
/// Dropping the handle stops the accept loop. Handlers already running finish
/// their current frame.
pub struct ReceiverHandle {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    stats: Arc<StatsCounters>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ReceiverHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn stats(&self) -> ReceiverStats {
        ReceiverStats {
            connections: self.stats.connections.load(Ordering::Relaxed),
            files_stored: self.stats.files_stored.load(Ordering::Relaxed),
            bytes_stored: self.stats.bytes_stored.load(Ordering::Relaxed),
            commands: self.stats.commands.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting and wait for the accept loop to exit (at most one poll interval)
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Accept loop panicked");
            }
        }
    }
}

impl Drop for ReceiverHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: TcpListener,
    poll_interval: Duration,
    shutdown: Arc<AtomicBool>,
    context: Arc<HandlerContext>,
) {
    info!("Starting accept loop");

    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                info!("Accepted connection from {}", peer);
                context.stats.connections.fetch_add(1, Ordering::Relaxed);
                dispatch(stream, peer, &context);
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(poll_interval);
            }
            Err(e) => {
                warn!("Error accepting connection: {}", e);
                thread::sleep(poll_interval);
            }
        }
    }

    info!("Accept loop stopped");
}

fn dispatch(stream: TcpStream, peer: SocketAddr, context: &Arc<HandlerContext>) {
    let handler_context = context.clone();
    let spawned = thread::Builder::new()
        .name(format!("meshdrop-conn-{peer}"))
        .spawn(move || handle_connection(stream, peer, &handler_context));

    if let Err(e) = spawned {
        error!("Failed to spawn handler for {}: {}", peer, e);
        publish(
            context,
            TransferEvent::Failed {
                name: None,
                peer,
                error: ReceiveError::Spawn(e),
            },
        );
    }
}

fn handle_connection(stream: TcpStream, peer: SocketAddr, context: &HandlerContext) {
    let mut declared_name = None;
    let event = match receive_frame(stream, peer, context, &mut declared_name) {
        Ok(event) => event,
        Err(error) => {
            warn!(
                "Transfer from {} failed{}: {}",
                peer,
                declared_name
                    .as_deref()
                    .map(|n| format!(" for '{n}'"))
                    .unwrap_or_default(),
                error
            );
            TransferEvent::Failed {
                name: declared_name,
                peer,
                error,
            }
        }
    };
    publish(context, event);
}

fn publish(context: &HandlerContext, event: TransferEvent) {
    let counter = match &event {
        TransferEvent::FileStored { bytes, .. } => {
            context.stats.bytes_stored.fetch_add(*bytes, Ordering::Relaxed);
            &context.stats.files_stored
        }
        TransferEvent::Command { .. } => &context.stats.commands,
        TransferEvent::Failed { .. } => &context.stats.failures,
    };
    counter.fetch_add(1, Ordering::Relaxed);

    if context.events.publish(event).is_err() {
        warn!("Event queue closed; dropping transfer event");
    }
}

/// Read one frame and persist it, or recognise it as a command
fn receive_frame(
    stream: TcpStream,
    peer: SocketAddr,
    context: &HandlerContext,
    declared_name: &mut Option<String>,
) -> Result<TransferEvent, ReceiveError> {
    // The listener is non-blocking; accepted sockets must not inherit that
    stream.set_nonblocking(false)?;
    stream.set_nodelay(context.tcp_nodelay)?;
    stream.set_read_timeout(context.read_timeout)?;

    let mut reader = BufReader::with_capacity(CHUNK_SIZE, stream);
    let header = context.protocol.read_header(&mut reader)?;
    *declared_name = Some(header.name().to_string());

    match header {
        FrameHeader::Command { name, payload_len } => {
            if payload_len > 0 {
                warn!(
                    "Command {} carried {} payload bytes; discarding",
                    name, payload_len
                );
                context.protocol.skip_payload(&mut reader, payload_len)?;
            }
            info!("Received command {} from {}", name, peer);
            Ok(TransferEvent::Command { name, peer })
        }
        FrameHeader::File { name, payload_len } => {
            let path = context.storage.resolve(&name)?;
            let bytes = store_payload(&context.protocol, &mut reader, &path, payload_len)?;
            info!("Stored {} ({} bytes) at {}", name, bytes, path.display());
            Ok(TransferEvent::FileStored {
                name,
                path,
                bytes,
                peer,
            })
        }
    }
}

/// Stream the payload into a temporary sibling of `path`, renaming it into
/// place only after the full declared length has arrived
fn store_payload(
    protocol: &Protocol,
    reader: &mut BufReader<TcpStream>,
    path: &Path,
    payload_len: u64,
) -> Result<u64, ReceiveError> {
    let io_failure = |source: io::Error| ReceiveError::IoFailure {
        path: path.to_path_buf(),
        source,
    };

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut partial = NamedTempFile::new_in(dir).map_err(io_failure)?;
    trace!("Receiving into {}", partial.path().display());

    let copied = {
        let mut writer = BufWriter::with_capacity(CHUNK_SIZE, partial.as_file_mut());
        let copied = protocol
            .copy_payload(reader, &mut writer, payload_len)
            .map_err(|e| match e {
                ProtocolError::Write(source) => io_failure(source),
                other => ReceiveError::Protocol(other),
            })?;
        writer.flush().map_err(io_failure)?;
        copied
    };
    partial.as_file().sync_all().map_err(io_failure)?;

    // Dropping `partial` on any earlier return removes the temporary file
    partial.persist(path).map_err(|e| io_failure(e.error))?;
    debug!("Persisted {} bytes to {}", copied, path.display());
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receiver_config_default() {
        let config = ReceiverConfig::default();
        assert!(config.tcp_nodelay);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.commands, vec![CENTER_BATCH_COMMAND.to_string()]);
        assert!(config.read_timeout.is_none());
    }

    #[test]
    fn test_config_commands_reach_protocol() {
        let config = ReceiverConfig {
            commands: vec!["__CMD_CLEAR__".to_string()],
            ..ReceiverConfig::default()
        };
        let protocol = config.protocol();
        assert!(protocol.is_command("__CMD_CLEAR__"));
        assert!(!protocol.is_command(CENTER_BATCH_COMMAND));
    }

    #[test]
    fn test_receiver_bind() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = FileReceiver::bind("127.0.0.1:0", dir.path()).unwrap();
        assert!(receiver.local_addr().is_ok());
    }

    #[test]
    fn test_validate_file_name() {
        assert!(validate_file_name("cube.obj").is_ok());
        assert!(validate_file_name("my model v2.obj").is_ok());

        for bad in ["", "..", ".", "../cube.obj", "a/b.obj", "a\\b.obj", "/etc/passwd", "x\0.obj"] {
            assert!(
                matches!(validate_file_name(bad), Err(ReceiveError::InvalidName(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_directory_storage_creates_base() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DirectoryStorage::new(dir.path().join("nested").join("store"));

        let path = storage.resolve("cube.obj").unwrap();
        assert_eq!(path, dir.path().join("nested").join("store").join("cube.obj"));
        assert!(storage.base().is_dir());
    }

    #[test]
    fn test_shutdown_within_poll_interval() {
        let dir = tempfile::tempdir().unwrap();
        let config = ReceiverConfig {
            poll_interval: Duration::from_millis(20),
            ..ReceiverConfig::default()
        };
        let receiver =
            FileReceiver::bind_with_config("127.0.0.1:0", config, DirectoryStorage::new(dir.path()))
                .unwrap();
        let (_events, handle) = receiver.run_async().unwrap();
        assert!(handle.is_running());

        let started = std::time::Instant::now();
        handle.shutdown();
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
