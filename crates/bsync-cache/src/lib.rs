//! # bsync-cache - JSON Staging Cache
//!
//! The write side of the two-phase engine: deterministic path derivation,
//! atomic JSON file primitives, the config-driven handler registry that
//! persists normalized records under the correct cache subtree, and the
//! study-user registry the processors classify against.
//!
//! ## Cache layout
//!
//! ```text
//! {cache_root}/
//!   study_user_activity/
//!     create/
//!       post/
//!       like/{subject_uri_suffix}/
//!       follow/follower/
//!       follow/followee/
//!       like_on_user_post/{subject_uri_suffix}/
//!       reply_to_user_post/{parent_uri_suffix}/
//!     delete/
//!   in_network_user_activity/
//!     create/
//!       post/{author_id}/
//!   __quarantine__/
//! ```
//!
//! Every file path is a pure function of the record it holds, so replays
//! overwrite the same file instead of duplicating it.

pub mod dirs;
pub mod fileio;
pub mod handler;
pub mod lock;
pub mod paths;
pub mod registry;

pub use dirs::DirectoryManager;
pub use handler::{
    default_handler_configs, GenericHandler, HandlerConfig, HandlerKey, HandlerRegistry,
    ReadStrategy,
};
pub use lock::CacheLock;
pub use registry::{RegistrySnapshot, StudyUserRegistry};
