//! Feed and service execution contexts

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::channel::{self, Receiver};
use tracing::{debug, error, info, trace, warn};

use crate::chain::{ChainBuilder, ChainStore, UpdateOutcome};
use crate::codec::WireCodec;
use crate::core::{ProtocolVersion, StartupError, StreamId, TransportError};
use crate::monitoring::MetricsRegistry;
use crate::resilience::{panic_message, StopToken};
use crate::response::ResponseCoordinator;
use crate::transport::{FeedEvent, FeedSource, RequestSource};
use crate::trigger::TriggerEvaluator;

/// Completion signal sent by a context thread as its last act
#[derive(Debug, Clone, Copy)]
pub(super) struct ContextExit {
    pub context: &'static str,
    pub panicked: bool,
}

pub(super) struct ContextHandle {
    pub name: &'static str,
    pub handle: JoinHandle<()>,
    pub done: Receiver<ContextExit>,
}

/// Spawn a named context thread that always reports its exit
///
/// A panicking context stops the whole process through `stop`.
pub(super) fn spawn_context<F>(
    name: &'static str,
    thread_name: &str,
    stop: StopToken,
    body: F,
) -> Result<ContextHandle, StartupError>
where
    F: FnOnce() + Send + 'static,
{
    let (tx, rx) = channel::bounded(1);
    let handle = thread::Builder::new()
        .name(thread_name.to_string())
        .spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(body));
            if let Err(payload) = &result {
                error!(
                    context = name,
                    message = %panic_message(payload.as_ref()),
                    "context panicked"
                );
                stop.stop("context panicked");
            }
            // The coordinator may already be gone on an aborted start
            let _ = tx.send(ContextExit {
                context: name,
                panicked: result.is_err(),
            });
        })
        .map_err(|e| StartupError::Spawn {
            context: name,
            reason: e.to_string(),
        })?;

    Ok(ContextHandle {
        name,
        handle,
        done: rx,
    })
}

/// Upstream processing: decode, trigger check, chain maintenance, scan
pub(super) struct FeedContext {
    pub builder: ChainBuilder,
    pub trigger: TriggerEvaluator,
    pub source: Box<dyn FeedSource>,
    pub codec: Arc<dyn WireCodec>,
    pub store: Arc<ChainStore>,
    pub accepting: Arc<AtomicBool>,
    pub stop: StopToken,
    pub poll_interval: Duration,
    pub metrics: MetricsRegistry,
}

impl FeedContext {
    pub fn run(mut self) {
        info!(chains = self.store.len(), "feed context started");
        let mut disconnected = false;

        while !self.stop.should_stop() {
            match self.source.poll(self.poll_interval) {
                Ok(Some(event)) => self.on_event(event),
                Ok(None) => {}
                Err(TransportError::Disconnected) => {
                    if !disconnected {
                        warn!("feed source disconnected");
                        disconnected = true;
                    }
                    self.stop.wait_timeout(self.poll_interval);
                }
                Err(e) => {
                    error!(error_code = e.code(), error = %e, "feed poll failed");
                    self.stop.wait_timeout(self.poll_interval);
                }
            }

            if let Some(report) = self.trigger.poll(&self.store, Instant::now()) {
                trace!(?report, "scan pass");
            }
        }

        info!("feed context stopped");
    }

    fn on_event(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Update {
                stream,
                version,
                data,
            } => self.on_update(stream, version, &data),
            FeedEvent::Synced => self.on_sync(),
        }
    }

    fn on_update(&mut self, stream: StreamId, version: ProtocolVersion, data: &Bytes) {
        let fields = match self.codec.decode_fields(data, version) {
            Ok(fields) => fields,
            Err(e) => {
                error!(stream = %stream, error_code = e.code(), error = %e, "update decode failed");
                self.metrics
                    .feed()
                    .update_failures_total
                    .with_label_values(&[e.code()])
                    .inc();
                return;
            }
        };

        self.trigger.observe(&fields, Instant::now());

        match self.builder.apply_update(stream, version, &fields) {
            Ok(report) => match &report.outcome {
                UpdateOutcome::Extended { next } => {
                    debug!(stream = %stream, next = %next, values = report.values, "chain extended")
                }
                UpdateOutcome::Completed { removed } => {
                    debug!(stream = %stream, removed, values = report.values, "chain complete")
                }
                UpdateOutcome::Unchanged => {
                    trace!(stream = %stream, values = report.values, "update applied")
                }
                UpdateOutcome::Detached => trace!(stream = %stream, "detached update"),
            },
            Err(e) => {
                error!(stream = %stream, error_code = e.code(), error = %e, "update failed");
                self.metrics
                    .feed()
                    .update_failures_total
                    .with_label_values(&[e.code()])
                    .inc();
            }
        }
    }

    fn on_sync(&mut self) {
        for chain in self.store.chains() {
            let has_entry = chain.root().is_some_and(|root| root.has_live_entry());
            if !has_entry {
                warn!(instrument = chain.instrument(), "Payload entry handle is null.");
            }
        }
        self.accepting.store(true, Ordering::Release);
        info!("feed synchronised, accepting requests");
    }
}

/// Downstream servicing
pub(super) struct ServiceContext {
    pub responder: ResponseCoordinator,
    pub source: Box<dyn RequestSource>,
    pub stop: StopToken,
    pub poll_interval: Duration,
}

impl ServiceContext {
    pub fn run(mut self) {
        info!("service context started");
        let mut disconnected = false;

        while !self.stop.should_stop() {
            match self.source.poll(self.poll_interval) {
                Ok(Some(request)) => {
                    // Failures are logged and counted by the responder
                    if let Ok(outcome) = self.responder.on_request(&request) {
                        debug!(item = %request.item_name, ?outcome, "request answered");
                    }
                }
                Ok(None) => {}
                Err(TransportError::Disconnected) => {
                    if !disconnected {
                        warn!("request source disconnected");
                        disconnected = true;
                    }
                    self.stop.wait_timeout(self.poll_interval);
                }
                Err(e) => {
                    error!(error_code = e.code(), error = %e, "request poll failed");
                    self.stop.wait_timeout(self.poll_interval);
                }
            }
        }

        info!("service context stopped");
    }
}
