pub mod chunk;
pub mod error;
pub mod idgen;
pub mod io;
pub mod pipe;
pub mod signal;
pub mod source;
pub mod stack;
pub mod stream;
pub mod tick;

// Re-export the stream types for convenience
pub use chunk::Chunk;
pub use stream::{Stream, StreamStatus, WeakStream};

// Re-export error types for convenience
pub use error::{fault, Fault, StreamError};

// Re-export signal types for convenience
pub use signal::{Handler, Signal, SignalBus, SignalKind, SubscriptionId};

// Re-export pipe and binding types
pub use idgen::StreamId;
pub use io::ChunkBuffer;
pub use pipe::PipeOptions;
pub use source::{feed_lines, BindOptions, EventSource, EventTable, Trigger, TriggerRole};
pub use stack::{Middleware, Next, StackRunner};
pub use tick::TickQueue;
