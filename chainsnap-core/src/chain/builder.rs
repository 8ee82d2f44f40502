//! Chain discovery and snapshot republication
//!
//! The builder runs on the feed thread only. For every upstream update it:
//!
//! 1. resolves the link the update belongs to (weak registry, detached links ignored)
//! 2. collects the non-blank payload values of both encodings in encounter order
//! 3. follows the next-link field (extend, complete/truncate, or leave as is)
//! 4. encodes a canonical response under the root's token and name
//! 5. decodes it and applies it to the link's live cache entry
//! 6. publishes the new image as the link's snapshot (continuous policy)

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use super::{Chain, ChainLink, ChainStore};
use crate::cache::SnapshotCache;
use crate::codec::{FieldLookup, FieldMap, Payload, ResponseDescriptor, WireCodec};
use crate::core::{
    fields, DecodeError, ProtocolVersion, RegistrationError, StreamId, UpdateError,
};
use crate::monitoring::MetricsRegistry;
use crate::transport::FeedTransport;

/// When link snapshots are published
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotPolicy {
    /// Publish on every update
    #[default]
    Continuous,
    /// Publish only from the trigger scan
    AtTrigger,
}

/// Structural effect of one update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// A new link was appended after this one
    Extended { next: String },
    /// This link is the last page; `removed` links beyond it were dropped
    Completed { removed: usize },
    /// Chain structure untouched
    Unchanged,
    /// The link is no longer part of its chain; update ignored
    Detached,
}

/// What `apply_update` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub outcome: UpdateOutcome,
    /// Payload values carried by the update
    pub values: usize,
    /// Whether a snapshot was published
    pub published: bool,
}

impl UpdateReport {
    fn detached() -> Self {
        Self {
            outcome: UpdateOutcome::Detached,
            values: 0,
            published: false,
        }
    }
}

enum NextLink {
    Last,
    Named(String),
}

/// Consumes decoded upstream updates and maintains every chain
pub struct ChainBuilder {
    codec: Arc<dyn WireCodec>,
    cache: Arc<dyn SnapshotCache>,
    feed: Arc<dyn FeedTransport>,
    registry: HashMap<StreamId, Weak<ChainLink>>,
    policy: SnapshotPolicy,
    metrics: MetricsRegistry,
}

impl ChainBuilder {
    pub fn new(
        codec: Arc<dyn WireCodec>,
        cache: Arc<dyn SnapshotCache>,
        feed: Arc<dyn FeedTransport>,
        policy: SnapshotPolicy,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            codec,
            cache,
            feed,
            registry: HashMap::new(),
            policy,
            metrics,
        }
    }

    pub fn policy(&self) -> SnapshotPolicy {
        self.policy
    }

    /// Subscribe an instrument's root page and add its chain to `store`
    pub fn create_root(
        &mut self,
        store: &mut ChainStore,
        instrument: &str,
    ) -> Result<Arc<Chain>, RegistrationError> {
        if store.contains(instrument) {
            return Err(RegistrationError::new(instrument, "duplicate instrument"));
        }
        let stream = self.feed.subscribe(instrument).inspect_err(|_| {
            self.metrics.feed().registration_failures_total.inc();
        })?;

        let chain = Chain::with_root(instrument, stream);
        if let Some(root) = chain.root() {
            self.registry.insert(stream, Arc::downgrade(&root));
        }
        store.insert(Arc::clone(&chain));
        self.metrics.feed().links_active.inc();
        debug!(instrument, stream = %stream, "root link registered");
        Ok(chain)
    }

    /// Link currently registered for a stream, if it is still attached
    pub fn resolve(&mut self, stream: StreamId) -> Option<Arc<ChainLink>> {
        let link = match self.registry.get(&stream).map(Weak::upgrade) {
            Some(Some(link)) => link,
            Some(None) => {
                self.registry.remove(&stream);
                return None;
            }
            None => return None,
        };
        is_attached(&link).then_some(link)
    }

    /// Number of streams in the registry, attached or not yet pruned
    pub fn registered(&self) -> usize {
        self.registry.len()
    }

    /// Drop registry entries whose link is gone or no longer in its chain
    fn prune_registry(&mut self) {
        let before = self.registry.len();
        self.registry
            .retain(|_, weak| weak.upgrade().is_some_and(|link| is_attached(&link)));
        trace!(pruned = before - self.registry.len(), "stream registry pruned");
    }

    /// Decode raw bytes and apply them
    pub fn apply_raw(
        &mut self,
        stream: StreamId,
        version: ProtocolVersion,
        data: &[u8],
    ) -> Result<UpdateReport, UpdateError> {
        let fields = self.codec.decode_fields(data, version)?;
        self.apply_update(stream, version, &fields)
    }

    /// Process one decoded update for the link registered under `stream`
    pub fn apply_update(
        &mut self,
        stream: StreamId,
        version: ProtocolVersion,
        fields: &FieldMap,
    ) -> Result<UpdateReport, UpdateError> {
        let started = Instant::now();

        let link = match self.resolve(stream) {
            Some(link) => link,
            None => {
                trace!(stream = %stream, "update for detached link ignored");
                self.metrics.feed().detached_updates_total.inc();
                return Ok(UpdateReport::detached());
            }
        };
        let chain = match link.chain() {
            Some(chain) => chain,
            None => return Ok(UpdateReport::detached()),
        };

        let values = collect_payload(fields);
        let next = next_link(fields)?;

        let outcome = match next {
            NextLink::Last => {
                let removed = chain.truncate(link.index() + 1);
                if removed > 0 {
                    info!(
                        instrument = chain.instrument(),
                        index = link.index(),
                        removed,
                        "chain truncated"
                    );
                    self.metrics.feed().truncations_total.inc();
                    self.metrics.feed().links_active.sub(removed as i64);
                    self.prune_registry();
                }
                UpdateOutcome::Completed { removed }
            }
            NextLink::Named(name) => self.extend(&chain, &link, name),
        };
        let is_complete = matches!(outcome, UpdateOutcome::Completed { .. });

        let token = chain.token();
        let descriptor = ResponseDescriptor {
            token,
            service_id: self.feed.service_id(),
            item_name: chain.instrument(),
            part_number: link.index() as u32,
            is_final: is_complete,
            payload: Payload::Entries(&values),
        };
        let canonical = self.codec.encode_response(version, &descriptor)?;
        let message = self.codec.decode_response(&canonical, version)?;

        let cache = &self.cache;
        let image = link.with_live_entry(|slot| -> Result<_, UpdateError> {
            let mut entry = match slot.take() {
                Some(entry) => entry,
                None => cache.create()?,
            };
            let applied = cache.apply(&mut entry, &message);
            *slot = Some(entry);
            Ok(applied?)
        })?;

        let published = self.policy == SnapshotPolicy::Continuous;
        if published {
            link.publish(image);
            self.metrics.snapshot().publications_total.inc();
        }

        self.metrics.feed().updates_total.inc();
        self.metrics
            .feed()
            .update_latency_us
            .observe(started.elapsed().as_secs_f64() * 1_000_000.0);
        trace!(
            instrument = chain.instrument(),
            index = link.index(),
            values = values.len(),
            published,
            "update applied"
        );

        Ok(UpdateReport {
            outcome,
            values: values.len(),
            published,
        })
    }

    fn extend(&mut self, chain: &Arc<Chain>, link: &ChainLink, name: String) -> UpdateOutcome {
        let index = link.index() + 1;
        if chain.len() != index {
            return UpdateOutcome::Unchanged;
        }

        let stream = match self.feed.subscribe(&name) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(
                    instrument = chain.instrument(),
                    index,
                    error_code = e.code(),
                    error = %e,
                    "Cannot create stream for next link"
                );
                self.metrics.feed().registration_failures_total.inc();
                return UpdateOutcome::Unchanged;
            }
        };
        if let Some(existing) = self.resolve(stream) {
            warn!(
                instrument = chain.instrument(),
                index,
                link = %name,
                stream = %stream,
                owner = existing.name(),
                "next link stream already belongs to another link, not added"
            );
            self.metrics.feed().registration_failures_total.inc();
            return UpdateOutcome::Unchanged;
        }

        match chain.push_link(index, &name, stream) {
            Some(next) => {
                self.registry.insert(stream, Arc::downgrade(&next));
                self.metrics.feed().links_discovered_total.inc();
                self.metrics.feed().links_active.inc();
                debug!(
                    instrument = chain.instrument(),
                    index,
                    link = %name,
                    stream = %stream,
                    "link discovered"
                );
                UpdateOutcome::Extended { next: name }
            }
            None => UpdateOutcome::Unchanged,
        }
    }
}

fn is_attached(link: &Arc<ChainLink>) -> bool {
    link.chain().is_some_and(|chain| chain.contains(link))
}

/// Non-blank payload values in encounter order, bounded by the designated field count
fn collect_payload(fields: &FieldMap) -> Vec<String> {
    let mut values = Vec::with_capacity(fields::LINKS_PER_PAGE);
    for (id, value) in fields.iter() {
        if !fields::is_payload(id) {
            continue;
        }
        match value {
            FieldLookup::Value(bytes) => {
                if values.len() == fields::MAX_PAYLOAD_VALUES {
                    warn!(field = id, "payload value beyond field limit dropped");
                    continue;
                }
                values.push(String::from_utf8_lossy(bytes).into_owned());
            }
            FieldLookup::Blank | FieldLookup::Absent => {
                trace!(field = id, "blank payload value skipped");
            }
        }
    }
    values
}

/// Next-link field; a non-blank occurrence in either encoding wins over a blank one
fn next_link(fields: &FieldMap) -> Result<NextLink, DecodeError> {
    let mut present = false;
    for (id, value) in fields.iter() {
        if !fields::is_next_link(id) {
            continue;
        }
        match value {
            FieldLookup::Value(bytes) => {
                return Ok(NextLink::Named(String::from_utf8_lossy(bytes).into_owned()));
            }
            FieldLookup::Blank => present = true,
            FieldLookup::Absent => {}
        }
    }
    if present {
        Ok(NextLink::Last)
    } else {
        Err(DecodeError::missing_field(fields::NEXT_LINK))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_payload_encounter_order() {
        let mut map = FieldMap::new();
        map.push_str(242, "C");
        map.push_str(240, "A");
        map.push_blank(241);
        map.push_str(800, "B");
        map.push_str(240, "A2");
        map.push_str(999, "ignored");
        assert_eq!(collect_payload(&map), vec!["C", "A", "B", "A2"]);
    }

    #[test]
    fn test_collect_payload_bounded() {
        let mut map = FieldMap::new();
        for id in 240..=253 {
            map.push_str(id, "x");
        }
        for id in 800..=813 {
            map.push_str(id, "y");
        }
        map.push_str(240, "overflow");
        let values = collect_payload(&map);
        assert_eq!(values.len(), fields::MAX_PAYLOAD_VALUES);
        assert_eq!(values.iter().filter(|v| *v == "x").count(), 14);
        assert!(!values.iter().any(|v| v == "overflow"));
    }

    #[test]
    fn test_next_link_variants() {
        let mut map = FieldMap::new();
        assert!(next_link(&map).is_err());

        map.push_blank(238);
        assert!(matches!(next_link(&map), Ok(NextLink::Last)));

        map.push_str(815, "FOO.1");
        match next_link(&map) {
            Ok(NextLink::Named(name)) => assert_eq!(name, "FOO.1"),
            _ => panic!("expected a named next link"),
        }
    }
}
