//! Snapshot trigger
//!
//! Upstream streams are ordered per item, not across items, so one symbol may
//! report 15:01 before another reports 15:00. The first update stamped at or
//! past the boundary hour opens a global window; after a grace period a scan
//! runs on a fixed cadence and captures every link that has a live image but
//! no snapshot yet. Low-liquidity symbols that update late are picked up by a
//! later pass.
//!
//! The window latches: once open it stays open for the life of the process.

use std::time::{Duration, Instant};

use chrono::{NaiveTime, Timelike};
use tracing::{debug, info};

use crate::chain::{Capture, ChainLink, ChainStore};
use crate::codec::{FieldLookup, FieldMap};
use crate::core::{fields, FieldId};
use crate::monitoring::MetricsRegistry;

const TIME_FORMATS: [&str; 3] = ["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"];

/// Trigger tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerPolicy {
    /// Hour of day (0-23) at or after which the window opens
    pub boundary_hour: u32,
    /// Field carrying the exchange time of the last activity
    pub timestamp_field: FieldId,
    /// Delay between the window opening and the first scan
    pub grace: Duration,
    /// Cadence of scan passes once the window is open
    pub scan_interval: Duration,
}

impl TriggerPolicy {
    pub const DEFAULT_BOUNDARY_HOUR: u32 = 15;
    pub const DEFAULT_GRACE: Duration = Duration::from_secs(60);
    pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(1);
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self {
            boundary_hour: Self::DEFAULT_BOUNDARY_HOUR,
            timestamp_field: fields::DEFAULT_TIMESTAMP,
            grace: Self::DEFAULT_GRACE,
            scan_interval: Self::DEFAULT_SCAN_INTERVAL,
        }
    }
}

/// What a single update says about the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSignal {
    /// Timestamp blank: market not open yet for this symbol
    MarketClosed,
    /// Timestamp absent or unreadable
    NoSignal,
    BeforeBoundary { hour: u32 },
    WindowOpen { hour: u32 },
}

/// Result of one scan pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub visited: usize,
    pub captured: usize,
    pub already_captured: usize,
    /// Links without a live image yet
    pub empty: usize,
}

/// Decides when the snapshot window opens and runs the capture scan
pub struct TriggerEvaluator {
    policy: TriggerPolicy,
    opened_at: Option<Instant>,
    last_scan: Option<Instant>,
    metrics: MetricsRegistry,
}

impl TriggerEvaluator {
    pub fn new(policy: TriggerPolicy, metrics: MetricsRegistry) -> Self {
        Self {
            policy,
            opened_at: None,
            last_scan: None,
            metrics,
        }
    }

    pub fn policy(&self) -> &TriggerPolicy {
        &self.policy
    }

    /// Classify the timestamp carried by an update
    pub fn evaluate(&self, fields: &FieldMap) -> TriggerSignal {
        let field = self.policy.timestamp_field;
        let raw = match fields.get(field) {
            FieldLookup::Blank => return TriggerSignal::MarketClosed,
            FieldLookup::Absent => {
                debug!(field, "timestamp field absent");
                return TriggerSignal::NoSignal;
            }
            FieldLookup::Value(raw) => raw,
        };

        let text = String::from_utf8_lossy(raw);
        match parse_time_of_day(text.trim()) {
            Some(time) if time.hour() >= self.policy.boundary_hour => {
                TriggerSignal::WindowOpen { hour: time.hour() }
            }
            Some(time) => TriggerSignal::BeforeBoundary { hour: time.hour() },
            None => {
                debug!(field, value = %text, "unparsable timestamp");
                TriggerSignal::NoSignal
            }
        }
    }

    /// Evaluate an update and latch the window open when it signals so
    pub fn observe(&mut self, fields: &FieldMap, now: Instant) -> TriggerSignal {
        let signal = self.evaluate(fields);
        if let TriggerSignal::WindowOpen { hour } = signal {
            if !self.is_open() {
                info!(hour, "snapshot window open");
                self.open_window(now);
            }
        }
        signal
    }

    /// Open the window explicitly (idempotent)
    pub fn open_window(&mut self, now: Instant) {
        if self.opened_at.is_none() {
            self.opened_at = Some(now);
            self.metrics.snapshot().window_open.set(1);
        }
    }

    pub fn is_open(&self) -> bool {
        self.opened_at.is_some()
    }

    /// Whether a scan pass should run at `now`
    pub fn scan_due(&self, now: Instant) -> bool {
        let Some(opened) = self.opened_at else {
            return false;
        };
        if now.saturating_duration_since(opened) < self.policy.grace {
            return false;
        }
        match self.last_scan {
            Some(last) => now.saturating_duration_since(last) >= self.policy.scan_interval,
            None => true,
        }
    }

    /// Run a scan pass if one is due
    pub fn poll(&mut self, store: &ChainStore, now: Instant) -> Option<ScanReport> {
        if !self.scan_due(now) {
            return None;
        }
        self.last_scan = Some(now);
        Some(self.scan(store))
    }

    /// Capture every link that has a live image but no snapshot
    pub fn scan(&self, store: &ChainStore) -> ScanReport {
        let mut report = ScanReport::default();
        for chain in store.chains() {
            for link in chain.links().iter() {
                report.visited += 1;
                match link.capture() {
                    Capture::Captured => {
                        report.captured += 1;
                        debug!(
                            instrument = chain.instrument(),
                            index = link.index(),
                            "snapshot captured"
                        );
                    }
                    Capture::AlreadyCaptured => report.already_captured += 1,
                    Capture::Empty => report.empty += 1,
                }
            }
        }

        self.metrics.snapshot().scans_total.inc();
        self.metrics
            .snapshot()
            .trigger_captures_total
            .inc_by(report.captured as u64);
        if report.captured > 0 {
            info!(
                visited = report.visited,
                captured = report.captured,
                already_captured = report.already_captured,
                empty = report.empty,
                "trigger scan"
            );
        }
        report
    }

    /// Whether the link already holds a snapshot this cycle
    pub fn has_snapshot(&self, link: &ChainLink) -> bool {
        link.has_snapshot()
    }
}

fn parse_time_of_day(text: &str) -> Option<NaiveTime> {
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(text, format).ok())
}
