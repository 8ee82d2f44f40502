//! Shutdown coordination and panic reporting
//!
//! - `StopToken`: cooperative stop flag shared with both execution contexts
//! - `install_panic_handler`: logs panics through `tracing`

pub mod panic;
pub mod stop_token;

pub use panic::{install_panic_handler, panic_message};
pub use stop_token::{StopState, StopToken};
