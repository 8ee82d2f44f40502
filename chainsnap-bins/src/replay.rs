//! Recorded feed replay
//!
//! A recording is a JSON-lines file, one update per line:
//!
//! ```text
//! {"item": "FOO", "fields": {"238": "FOO.1", "240": "A"}}
//! {"item": "FOO.1", "fields": {"238": null, "240": "B"}}
//! ```
//!
//! Field keys are numeric field ids; `null` encodes a blank value. Blank lines and
//! lines starting with `#` are skipped.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chainsnap_core::codec::FieldMap;
use chainsnap_core::transport::FeedInjector;
use serde::Deserialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReplayRecord {
    pub item: String,
    #[serde(default)]
    pub fields: BTreeMap<String, Option<String>>,
}

impl ReplayRecord {
    /// Field list in ascending id order
    pub fn to_field_map(&self) -> Result<FieldMap> {
        let mut entries = Vec::with_capacity(self.fields.len());
        for (key, value) in &self.fields {
            let id: u16 = key
                .trim()
                .parse()
                .with_context(|| format!("invalid field id {:?} for {}", key, self.item))?;
            entries.push((id, value.as_deref()));
        }
        entries.sort_by_key(|(id, _)| *id);

        let mut map = FieldMap::with_capacity(entries.len());
        for (id, value) in entries {
            match value {
                Some(v) => map.push_str(id, v),
                None => map.push_blank(id),
            }
        }
        Ok(map)
    }
}

/// Parse a whole recording
pub fn parse_replay(contents: &str) -> Result<Vec<ReplayRecord>> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("replay line {}", n + 1))
        })
        .collect()
}

pub fn load_replay(path: &Path) -> Result<Vec<ReplayRecord>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read replay file {}", path.display()))?;
    parse_replay(&contents)
}

/// Outcome of injecting a recording
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub published: usize,
    /// Records whose item never got subscribed within the wait
    pub skipped: usize,
}

/// Publish every record, waiting up to `wait` for each item to be subscribed
///
/// Links are only subscribed once the feed thread has processed their
/// predecessor, so records must be in discovery order.
pub fn replay(
    injector: &FeedInjector,
    records: &[ReplayRecord],
    wait: Duration,
) -> Result<ReplaySummary> {
    let mut summary = ReplaySummary::default();
    for record in records {
        let fields = record.to_field_map()?;
        if injector.wait_for_subscription(&record.item, wait).is_none() {
            warn!(item = %record.item, "replay item not subscribed, skipping");
            summary.skipped += 1;
            continue;
        }
        let delivered = injector
            .publish(&record.item, &fields)
            .map_err(|e| anyhow!("replay publish failed for {}: {}", record.item, e))?;
        if delivered {
            summary.published += 1;
            debug!(item = %record.item, fields = fields.len(), "replayed");
        } else {
            summary.skipped += 1;
        }
    }
    info!(
        published = summary.published,
        skipped = summary.skipped,
        "replay complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainsnap_core::codec::FieldLookup;
    use std::io::Write;

    #[test]
    fn test_parse_replay_lines() {
        let records = parse_replay(
            r#"
# recorded 2026-10-01
{"item": "FOO", "fields": {"240": "A", "238": "FOO.1"}}

{"item": "FOO.1", "fields": {"238": null}}
"#,
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].item, "FOO");
        assert_eq!(records[1].fields.get("238"), Some(&None));
    }

    #[test]
    fn test_field_map_ordering_and_blanks() {
        let records =
            parse_replay(r#"{"item": "FOO", "fields": {"240": "A", "238": null, "5": "15:00"}}"#)
                .unwrap();
        let map = records[0].to_field_map().unwrap();
        let ids: Vec<u16> = map.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![5, 238, 240]);
        assert_eq!(map.get(238), FieldLookup::Blank);
        assert_eq!(map.get(240), FieldLookup::Value(b"A"));
    }

    #[test]
    fn test_invalid_field_id_rejected() {
        let records = parse_replay(r#"{"item": "FOO", "fields": {"abc": "A"}}"#).unwrap();
        let err = records[0].to_field_map().unwrap_err();
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let err = parse_replay("{\"item\": \"FOO\"}\nnot json").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_load_replay_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"item": "FOO", "fields": {{"238": null}}}}"#).unwrap();
        let records = load_replay(file.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert!(load_replay(Path::new("/nonexistent/replay.jsonl")).is_err());
    }
}
