//! Length-prefixed file and command transfer over TCP
//!
//! A sender opens one connection per transfer and writes a single frame: a
//! name and a payload, each preceded by its length. The receiver accepts
//! connections on a polling loop, hands each to its own thread, stores file
//! payloads on disk and publishes one [`TransferEvent`] per connection into a
//! multi-producer, single-consumer queue. Reserved names travel as commands
//! instead of files.

pub mod protocol;
pub mod queue;
pub mod receiver;
pub mod sender;
pub mod types;

// Re-export commonly used types
pub use protocol::{
    DecodedFrame, Frame, FrameHeader, FrameSection, Protocol, ProtocolError, CENTER_BATCH_COMMAND,
};
pub use queue::{event_queue, EventReceiver, EventSender, QueueClosed};
pub use receiver::{
    DirectoryStorage, FileReceiver, ReceiveError, ReceiverConfig, ReceiverHandle, ReceiverStats,
    StorageResolver,
};
pub use sender::{send, send_batch, FileSender, NetworkError, SenderConfig};
pub use types::TransferEvent;

/// Result type for send operations
pub type Result<T> = std::result::Result<T, NetworkError>;
