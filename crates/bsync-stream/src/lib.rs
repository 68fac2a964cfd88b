//! # bsync-stream - Firehose Ingestion
//!
//! The ingest side of the engine: a resumable WebSocket client that parses
//! upstream commit events into frames, per-record-type processors that
//! classify them against the study-user registry, and the single-threaded
//! dispatcher that persists routing decisions into the JSON cache before
//! advancing the durable cursor.
//!
//! Concurrency shape: the client owns the connection and hands frames to
//! the dispatcher over a bounded channel; the dispatcher owns all cache
//! writes and the cursor, which keeps per-cursor ordering trivial.

pub mod client;
pub mod cursor;
pub mod dispatch;
pub mod process;
pub mod wire;

pub use client::{ClientState, FirehoseClient};
pub use cursor::{CursorStore, FileCursorStore, MemoryCursorStore, ObjectCursorStore};
pub use dispatch::{run_dispatcher, DispatchResult, OperationsDispatcher};
