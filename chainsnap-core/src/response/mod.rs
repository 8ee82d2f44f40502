//! Multi-part response assembly
//!
//! A request for a known instrument is answered with one part per chain link,
//! each carrying that link's snapshot at the moment it is read. The link array
//! is resolved once per request, so the part count is fixed for the walk even if
//! the feed thread truncates or extends the chain concurrently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::chain::{Chain, ChainStore};
use crate::codec::{CloseDescriptor, Payload, ResponseDescriptor, WireCodec};
use crate::core::{RequestError, StatusCode, StreamState, SubscriptionRequest};
use crate::monitoring::MetricsRegistry;
use crate::transport::ServiceTransport;

pub const TEXT_NOT_FOUND: &str = "Not found in symbol set.";
pub const TEXT_MALFORMED: &str = "Malformed request.";
pub const TEXT_NOT_READY: &str = "Service not ready.";
pub const TEXT_INTERNAL: &str = "Internal error.";

/// How a request was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// One part per link was sent
    Served { parts: usize },
    /// Closed: instrument is not in the symbol set
    NotFound,
    /// Closed: request had no item name
    Malformed,
    /// Closed recoverable: upstream not synchronised yet
    NotReady,
    /// Encoding a part failed; closed recoverable after `parts_sent` parts
    Aborted { parts_sent: usize },
}

impl RequestOutcome {
    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            RequestOutcome::Served { .. } => "served",
            RequestOutcome::NotFound => "not_found",
            RequestOutcome::Malformed => "malformed",
            RequestOutcome::NotReady => "not_ready",
            RequestOutcome::Aborted { .. } => "aborted",
        }
    }
}

/// Serves downstream requests from the chain store
pub struct ResponseCoordinator {
    store: Arc<ChainStore>,
    codec: Arc<dyn WireCodec>,
    transport: Arc<dyn ServiceTransport>,
    accepting: Arc<AtomicBool>,
    metrics: MetricsRegistry,
}

impl ResponseCoordinator {
    pub fn new(
        store: Arc<ChainStore>,
        codec: Arc<dyn WireCodec>,
        transport: Arc<dyn ServiceTransport>,
        accepting: Arc<AtomicBool>,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            store,
            codec,
            transport,
            accepting,
            metrics,
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Answer one request
    pub fn on_request(&self, req: &SubscriptionRequest) -> Result<RequestOutcome, RequestError> {
        debug!(
            channel = %req.channel,
            protocol = %req.protocol,
            token = %req.token,
            service_id = req.service_id,
            item = %req.item_name,
            use_attrib_info = req.use_attrib_info,
            "request"
        );

        let result = self.dispatch(req);
        match &result {
            Ok(outcome) => {
                self.metrics
                    .service()
                    .requests_total
                    .with_label_values(&[outcome.label()])
                    .inc();
            }
            Err(e) => {
                error!(
                    item = %req.item_name,
                    token = %req.token,
                    error_code = e.code(),
                    error = %e,
                    "request failed"
                );
                self.metrics
                    .service()
                    .request_failures_total
                    .with_label_values(&[e.code()])
                    .inc();
            }
        }
        result
    }

    fn dispatch(&self, req: &SubscriptionRequest) -> Result<RequestOutcome, RequestError> {
        if req.item_name.is_empty() {
            warn!(token = %req.token, "closing malformed request");
            self.close(req, StreamState::Closed, StatusCode::InvalidArgument, TEXT_MALFORMED)?;
            return Ok(RequestOutcome::Malformed);
        }

        if !self.is_accepting() {
            info!(item = %req.item_name, "closing request received before sync");
            self.close(req, StreamState::ClosedRecover, StatusCode::None, TEXT_NOT_READY)?;
            return Ok(RequestOutcome::NotReady);
        }

        match self.store.get(&req.item_name) {
            Some(chain) => self.serve(req, chain),
            None => {
                info!(item = %req.item_name, "Closing resource not found");
                self.close(req, StreamState::Closed, StatusCode::NotFound, TEXT_NOT_FOUND)?;
                Ok(RequestOutcome::NotFound)
            }
        }
    }

    fn serve(
        &self,
        req: &SubscriptionRequest,
        chain: &Chain,
    ) -> Result<RequestOutcome, RequestError> {
        let links = chain.links();
        let last = links.len().saturating_sub(1);

        for (part, link) in links.iter().enumerate() {
            let snapshot = link.snapshot();
            let is_final = part == last;
            let descriptor = ResponseDescriptor {
                token: req.token,
                service_id: req.service_id,
                item_name: &req.item_name,
                part_number: part as u32,
                is_final,
                payload: Payload::Cached(snapshot.as_deref()),
            };

            let data = match self.codec.encode_response(req.protocol, &descriptor) {
                Ok(data) => data,
                Err(e) => {
                    error!(
                        item = %req.item_name,
                        part,
                        error_code = e.code(),
                        error = %e,
                        "response encode failed"
                    );
                    self.close(req, StreamState::ClosedRecover, StatusCode::Error, TEXT_INTERNAL)?;
                    return Ok(RequestOutcome::Aborted { parts_sent: part });
                }
            };

            self.transport.send(req.channel, req.token, data, is_final)?;
            self.metrics.service().parts_sent_total.inc();
        }

        debug!(item = %req.item_name, parts = links.len(), "request served");
        Ok(RequestOutcome::Served { parts: links.len() })
    }

    fn close(
        &self,
        req: &SubscriptionRequest,
        state: StreamState,
        code: StatusCode,
        text: &str,
    ) -> Result<(), RequestError> {
        let descriptor = CloseDescriptor {
            token: req.token,
            service_id: req.service_id,
            item_name: &req.item_name,
            include_key: req.use_attrib_info,
            state,
            code,
            text,
        };
        let data = self.codec.encode_close(req.protocol, &descriptor)?;
        self.transport.close(req.channel, req.token, data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels_are_distinct() {
        let labels = [
            RequestOutcome::Served { parts: 1 }.label(),
            RequestOutcome::NotFound.label(),
            RequestOutcome::Malformed.label(),
            RequestOutcome::NotReady.label(),
            RequestOutcome::Aborted { parts_sent: 0 }.label(),
        ];
        let mut unique = labels.to_vec();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), labels.len());
    }
}
