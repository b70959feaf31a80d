//! pop library exports.
//!
//! The binary in `main.rs` is a thin CLI layer; everything with behavior
//! lives here so integration tests can drive the pipeline directly.

pub mod cargo;
pub mod config;
pub mod error;
pub mod image;
pub mod pipeline;
pub mod plan;
pub mod qemu;
pub mod report;
