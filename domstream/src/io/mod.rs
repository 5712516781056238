//! Storage layer for streams
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  Pipe (coordination layer)          │
//! │  - pump loop, drain credits         │
//! │  - fan-out to destinations          │
//! └─────────────────────────────────────┘
//!          ▲
//!          │ pulls from
//!          ▼
//! ┌─────────────────────────────────────┐
//! │  Stream (state + signals)           │
//! │  - needs_more / readable debounce   │
//! │  - signal bus                       │
//! └─────────────────────────────────────┘
//!          ▲
//!          │ owns one
//!          ▼
//! ┌─────────────────────────────────────┐
//! │  ChunkBuffer (storage)              │
//! │  - VecDeque<Chunk>                  │
//! │  - append / prepend / take          │
//! └─────────────────────────────────────┘
//! ```

pub mod buffer;

pub use buffer::ChunkBuffer;
