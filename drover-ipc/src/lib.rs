//! Messaging between processors and workers
//!
//! Workers and processors share no memory and no pipes: every message goes
//! through the store's pub/sub channels inside a versioned JSON envelope.
//! Envelopes carry a per-sender sequence number so receivers can drop
//! anything that arrives out of order.

pub mod channels;
pub mod error;
pub mod protocol;
pub mod transport;

pub use channels::TaskChannels;
pub use error::{IpcError, IpcResult};
pub use protocol::{CompletionNotice, ControlMessage, MessageEnvelope, WorkerEvent, IPC_PROTOCOL_VERSION};
pub use transport::{ChannelPublisher, ChannelReceiver};
