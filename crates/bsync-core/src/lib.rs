//! # bsync-core - Shared Types for the Bluesky Sync Engine
//!
//! This crate provides the foundational types shared by every stage of the
//! firehose ingestion and export pipeline: the commit-stream frame model, the
//! normalized record variants written to the cache, the YAML configuration
//! surface, and the error taxonomy.
//!
//! ## Key Components
//!
//! - **Frame Model**: [`CommitFrame`], [`RawOp`] and the opaque [`Cursor`]
//!   token identifying a position in the upstream stream
//! - **Record Model**: [`NormalizedRecord`] routing envelope around a
//!   [`RecordBody`] sum type, one variant per payload shape
//! - **Configuration**: [`SyncConfig`] loaded from YAML with serde defaults
//! - **Error Handling**: typed error enums for handlers, cursors, the stream
//!   task, and the exporter

pub mod config;
pub mod error;
pub mod frame;
pub mod record;

pub use config::SyncConfig;
pub use error::{CursorError, ExportError, HandlerError, StreamError};
pub use frame::{CommitFrame, Cursor, OpKind, RawOp};
pub use record::{FollowStatus, NormalizedRecord, Operation, RecordBody, RecordType};
