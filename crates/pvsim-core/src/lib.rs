//! # pvsim-core
//!
//! Core data model and extraction logic for the channel simulator.
//!
//! This crate provides:
//! - Data model types (DeviceSpec, ControlVariable, TargetEntry, etc.)
//! - Channel path handling and name pattern matching
//! - Instrument tree traversal (positional and named-path modes)
//! - Module extraction and the flat channel registry (`build_config`)
//! - Persisted target file storage with additive repair
//!
//! This crate is intentionally runtime-agnostic and contains no async code.

pub mod extract;
pub mod model;
pub mod path;
pub mod targets;
pub mod walker;

pub use extract::{build_config, FoundModule, ALLOWED_MODULES, SIM_SOURCE_PREFIX};
pub use model::*;
pub use path::{ChannelPath, NamePattern, PathSegment};
pub use targets::{TargetError, TargetFile};
