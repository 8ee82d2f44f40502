//! Startup, execution contexts and shutdown
//!
//! ```text
//! Created ──initialize──► Initializing ──start──► Running ──shutdown──► ShuttingDown ──► Stopped
//!    │                         │
//!    └──── startup failure ────┴──────────────────────────────────────────────────────► Stopped
//! ```
//!
//! Running owns two named threads:
//! - `chainsnap-feed`: polls the feed source, drives the chain builder and the trigger scan
//! - `chainsnap-service`: polls the request source, drives the response coordinator
//!
//! Each thread reports its exit on a dedicated completion channel, including
//! when it panics. Shutdown stops the service side first, then the feed side,
//! waits for both completions without a timeout and finally checks that every
//! released collaborator is exclusively owned again.

mod context;

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::cache::{MemoryCache, SnapshotCache};
use crate::chain::{ChainBuilder, ChainStore};
use crate::codec::{BinaryCodec, WireCodec};
use crate::config::Settings;
use crate::core::{LifecycleError, StartupError};
use crate::monitoring::MetricsRegistry;
use crate::resilience::StopToken;
use crate::response::ResponseCoordinator;
use crate::transport::{
    FeedInjector, FeedSource, FeedTransport, LoopbackTransport, RequestInjector, RequestSource,
    ServiceTransport,
};
use crate::trigger::TriggerEvaluator;

use context::{spawn_context, ContextExit, ContextHandle, FeedContext, ServiceContext};

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Created = 0,
    Initializing = 1,
    Running = 2,
    ShuttingDown = 3,
    Stopped = 4,
}

impl LifecycleState {
    pub fn name(self) -> &'static str {
        match self {
            LifecycleState::Created => "created",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Running => "running",
            LifecycleState::ShuttingDown => "shutting_down",
            LifecycleState::Stopped => "stopped",
        }
    }
}

impl From<u8> for LifecycleState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Initializing,
            2 => Self::Running,
            3 => Self::ShuttingDown,
            _ => Self::Stopped,
        }
    }
}

/// Everything the coordinator needs from the outside world
pub struct Collaborators {
    pub codec: Arc<dyn WireCodec>,
    pub cache: Arc<dyn SnapshotCache>,
    pub feed: Arc<dyn FeedTransport>,
    pub feed_source: Box<dyn FeedSource>,
    pub service: Arc<dyn ServiceTransport>,
    pub request_source: Box<dyn RequestSource>,
}

impl Collaborators {
    /// Bundled codec and cache over a loopback transport; returns the injector halves
    pub fn loopback(
        transport: LoopbackTransport,
        cache: MemoryCache,
    ) -> (Collaborators, FeedInjector, RequestInjector) {
        let LoopbackTransport {
            feed,
            feed_source,
            feed_injector,
            service,
            request_source,
            request_injector,
        } = transport;
        let collaborators = Collaborators {
            codec: Arc::new(BinaryCodec::new()),
            cache: Arc::new(cache),
            feed: Arc::new(feed),
            feed_source: Box::new(feed_source),
            service: Arc::new(service),
            request_source: Box::new(request_source),
        };
        (collaborators, feed_injector, request_injector)
    }
}

/// Shared collaborators retained for the teardown ownership check
struct Retained {
    codec: Arc<dyn WireCodec>,
    cache: Arc<dyn SnapshotCache>,
    feed: Arc<dyn FeedTransport>,
    service: Arc<dyn ServiceTransport>,
}

/// Sources and the builder, parked between `initialize` and `start`
struct Prepared {
    builder: ChainBuilder,
    feed_source: Box<dyn FeedSource>,
    request_source: Box<dyn RequestSource>,
}

/// Owns both execution contexts and sequences startup and shutdown
pub struct LifecycleCoordinator {
    settings: Settings,
    state: AtomicU8,
    stop: StopToken,
    accepting: Arc<AtomicBool>,
    metrics: MetricsRegistry,
    pending: Option<Collaborators>,
    retained: Option<Retained>,
    prepared: Option<Prepared>,
    store: Option<Arc<ChainStore>>,
    // service first: shutdown order
    contexts: Vec<ContextHandle>,
}

impl LifecycleCoordinator {
    pub fn new(settings: Settings, collaborators: Collaborators, metrics: MetricsRegistry) -> Self {
        Self {
            settings,
            state: AtomicU8::new(LifecycleState::Created as u8),
            stop: StopToken::new(),
            accepting: Arc::new(AtomicBool::new(false)),
            metrics,
            pending: Some(collaborators),
            retained: None,
            prepared: None,
            store: None,
            contexts: Vec::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state.load(Ordering::Acquire).into()
    }

    fn set_state(&self, next: LifecycleState) {
        let previous = LifecycleState::from(self.state.swap(next as u8, Ordering::AcqRel));
        info!(from = previous.name(), to = next.name(), "lifecycle transition");
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Chain store, available once initialized
    pub fn store(&self) -> Option<Arc<ChainStore>> {
        self.store.clone()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Block until requests are accepted, the token stops, or `timeout` elapses
    pub fn wait_until_accepting(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_accepting() {
            let now = Instant::now();
            if now >= deadline || self.stop.should_stop() {
                return self.is_accepting();
            }
            self.stop
                .wait_timeout((deadline - now).min(Duration::from_millis(5)));
        }
        true
    }

    /// Bring up collaborators and build one root link per instrument
    pub fn initialize(&mut self, symbols: &[String]) -> Result<(), LifecycleError> {
        let state = self.state();
        if state != LifecycleState::Created {
            return Err(StartupError::InvalidState(state.name()).into());
        }
        self.set_state(LifecycleState::Initializing);

        let collaborators = match self.pending.take() {
            Some(c) => c,
            None => return Err(self.fail_startup(StartupError::InvalidState(state.name()))),
        };
        let Collaborators {
            codec,
            cache,
            feed,
            feed_source,
            service,
            request_source,
        } = collaborators;

        if let Err(e) = feed.initialize() {
            return Err(self.fail_startup(StartupError::Collaborator {
                name: "feed transport",
                reason: e.to_string(),
            }));
        }
        if let Err(e) = service.initialize() {
            return Err(self.fail_startup(StartupError::Collaborator {
                name: "service transport",
                reason: e.to_string(),
            }));
        }
        info!(codec = codec.name(), service_id = feed.service_id(), "collaborators initialized");

        let mut builder = ChainBuilder::new(
            Arc::clone(&codec),
            Arc::clone(&cache),
            Arc::clone(&feed),
            self.settings.trigger.policy,
            self.metrics.clone(),
        );

        let mut store = ChainStore::new();
        for instrument in symbols.iter().filter(|s| !s.is_empty()) {
            if let Err(e) = builder.create_root(&mut store, instrument) {
                warn!(
                    instrument = %instrument,
                    error_code = e.code(),
                    error = %e,
                    "Cannot create stream"
                );
            }
        }
        info!(
            symbols = symbols.len(),
            chains = store.len(),
            "Initialisation complete"
        );

        if self.settings.service.accept_before_sync {
            self.accepting.store(true, Ordering::Release);
        }

        self.store = Some(Arc::new(store));
        self.retained = Some(Retained {
            codec,
            cache,
            feed,
            service,
        });
        self.prepared = Some(Prepared {
            builder,
            feed_source,
            request_source,
        });
        Ok(())
    }

    fn fail_startup(&mut self, error: StartupError) -> LifecycleError {
        error!(error_code = error.code(), error = %error, "Initialisation failed");
        self.pending = None;
        self.set_state(LifecycleState::Stopped);
        error.into()
    }

    /// Spawn the feed and service threads
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        let state = self.state();
        if state != LifecycleState::Initializing {
            return Err(LifecycleError::InvalidTransition {
                from: state.name(),
                to: LifecycleState::Running.name(),
            });
        }
        let (prepared, store, retained) =
            match (self.prepared.take(), self.store.clone(), self.retained.as_ref()) {
                (Some(p), Some(s), Some(r)) => (p, s, r),
                _ => return Err(StartupError::InvalidState(state.name()).into()),
            };

        let responder = ResponseCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&retained.codec),
            Arc::clone(&retained.service),
            Arc::clone(&self.accepting),
            self.metrics.clone(),
        );
        let service = ServiceContext {
            responder,
            source: prepared.request_source,
            stop: self.stop.clone(),
            poll_interval: self.settings.service_poll_interval(),
        };

        let feed = FeedContext {
            builder: prepared.builder,
            trigger: TriggerEvaluator::new(self.settings.trigger_policy(), self.metrics.clone()),
            source: prepared.feed_source,
            codec: Arc::clone(&retained.codec),
            store,
            accepting: Arc::clone(&self.accepting),
            stop: self.stop.clone(),
            poll_interval: self.settings.feed_poll_interval(),
            metrics: self.metrics.clone(),
        };

        let service_handle =
            match spawn_context("service", "chainsnap-service", self.stop.clone(), move || {
                service.run()
            }) {
                Ok(handle) => handle,
                Err(e) => return Err(self.abort_start(e)),
            };
        self.contexts.push(service_handle);

        let feed_handle = match spawn_context("feed", "chainsnap-feed", self.stop.clone(), move || {
            feed.run()
        }) {
            Ok(handle) => handle,
            Err(e) => return Err(self.abort_start(e)),
        };
        self.contexts.push(feed_handle);

        self.set_state(LifecycleState::Running);
        Ok(())
    }

    fn abort_start(&mut self, error: StartupError) -> LifecycleError {
        error!(error_code = error.code(), error = %error, "start failed");
        self.stop.stop("start failed");
        self.set_state(LifecycleState::ShuttingDown);
        // Teardown errors are secondary to the startup failure
        let _ = self.teardown();
        error.into()
    }

    /// Block until the stop token fires, then shut down
    pub fn run(&mut self) -> Result<(), LifecycleError> {
        while !self.stop.wait_timeout(Duration::from_millis(250)) {}
        self.shutdown()
    }

    /// Stop both contexts, wait for them and release every collaborator
    pub fn shutdown(&mut self) -> Result<(), LifecycleError> {
        match self.state() {
            LifecycleState::Stopped => return Ok(()),
            LifecycleState::Created | LifecycleState::Initializing => {
                self.stop.stop("shutdown before start");
                self.set_state(LifecycleState::ShuttingDown);
            }
            LifecycleState::Running | LifecycleState::ShuttingDown => {
                self.stop.stop("shutdown requested");
                self.set_state(LifecycleState::ShuttingDown);
            }
        }
        self.teardown()
    }

    fn teardown(&mut self) -> Result<(), LifecycleError> {
        let mut first_error: Option<LifecycleError> = None;

        for ctx in self.contexts.drain(..) {
            let exit = ctx.done.recv().unwrap_or(ContextExit {
                context: ctx.name,
                panicked: true,
            });
            if ctx.handle.join().is_err() && !exit.panicked {
                warn!(context = ctx.name, "context thread terminated abnormally");
            }
            if exit.panicked {
                let e = LifecycleError::ContextPanicked {
                    context: exit.context,
                };
                error!(error_code = e.code(), error = %e, "context failed");
                first_error.get_or_insert(e);
            } else {
                info!(context = exit.context, "context stopped");
            }
        }

        self.prepared = None;
        self.pending = None;
        self.store = None;

        if let Some(retained) = self.retained.take() {
            let Retained {
                codec,
                cache,
                feed,
                service,
            } = retained;
            let checks = [
                ("service transport", Arc::strong_count(&service)),
                ("feed transport", Arc::strong_count(&feed)),
                ("payload cache", Arc::strong_count(&cache)),
                ("codec", Arc::strong_count(&codec)),
            ];
            for (collaborator, strong_count) in checks {
                if strong_count > 1 {
                    let e = LifecycleError::TeardownViolation {
                        collaborator,
                        strong_count,
                    };
                    error!(error_code = e.code(), error = %e, "teardown check failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        self.set_state(LifecycleState::Stopped);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for LifecycleCoordinator {
    fn drop(&mut self) {
        if matches!(
            self.state(),
            LifecycleState::Running | LifecycleState::ShuttingDown
        ) {
            if let Err(e) = self.shutdown() {
                error!(error_code = e.code(), error = %e, "shutdown on drop failed");
            }
        }
    }
}
