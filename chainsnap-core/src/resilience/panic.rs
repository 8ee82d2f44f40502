//! Global panic hook
//!
//! Logs the location and message of any panic through `tracing` before the
//! default hook runs. Panics inside the feed or service thread are then
//! caught by the lifecycle coordinator and reported as `ContextPanicked`.

use std::panic;
use tracing::error;

/// Install the logging panic hook (call once, early in `main`)
pub fn install_panic_handler() {
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_else(|| "<unknown location>".to_string());

        let thread = std::thread::current();
        let thread = thread.name().unwrap_or("<unnamed>");

        error!(
            location = %location,
            message = %panic_message(panic_info.payload()),
            thread,
            "panic"
        );

        default_hook(panic_info);
    }));

    tracing::debug!("panic handler installed");
}

/// Best-effort text of a panic payload
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<no message>".to_string()
    }
}
