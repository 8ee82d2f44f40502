//! Binary support for the chainsnap republisher
//!
//! - `common`: CLI arguments shared by binaries and logging setup
//! - `replay`: JSON-lines feed recordings injected into the loopback transport

pub mod common;
pub mod replay;
