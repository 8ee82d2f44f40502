//! Test fixtures shared by unit tests, integration tests and benchmarks
//!
//! - Page builders (`page`, `long_page`, `with_timestamp`)
//! - `ChainFixture`: a chain builder over an initialized loopback feed, no threads
//! - `ServiceHarness`: a running coordinator with both injector halves

pub mod helpers;

pub use helpers::*;
