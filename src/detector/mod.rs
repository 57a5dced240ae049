//! Change detection over full snapshots.
//!
//! Every function here is pure apart from the memory it is handed: the store
//! delivers the whole subtree on each mutation and these functions reduce it
//! to the entries a particular connection has not seen yet. Null or malformed
//! input is treated as "no data", never as an error.

use crate::model::{DeviceState, EntityId, Notice, NoticeType, OfficeInfo, SummaryRecord};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;


/// Per-entity sub-tree name for summaries
pub const SUMMARIES: &str = "resumenes";
/// Per-entity sub-tree name for notices
pub const NOTICES: &str = "avisos";
/// Per-entity record name for device flags
pub const DEVICES: &str = "estados_dispositivos";

/// Extract one per-entity field out of the `oficinas` snapshot, producing
/// `{entity: field_value}`. Entities without the field are omitted.
pub fn project(oficinas: Option<&Value>, field: &str) -> Map<String, Value> {
    let Some(entities) = oficinas.and_then(Value::as_object) else {
        return Map::new();
    };
    entities
        .iter()
        .filter_map(|(id, node)| {
            node.get(field)
                .filter(|v| !v.is_null())
                .map(|v| (id.clone(), v.clone()))
        })
        .collect()
}

/// Latest summary per entity, by greatest `timestamp`.
///
/// Records without a `timestamp` field fall back to their key parsed as one.
/// On a timestamp tie the record with the greatest key wins (last seen in key
/// order). Entities with no usable record are omitted.
pub fn latest_per_entity(raw: &Map<String, Value>) -> BTreeMap<EntityId, SummaryRecord> {
    let mut latest = BTreeMap::new();
    for (entity, records) in raw {
        let Some(records) = records.as_object() else {
            continue;
        };
        let mut best: Option<SummaryRecord> = None;
        for (key, record) in records {
            let Some(record) = parse_summary(key, record) else {
                debug!(entity = %entity, key = %key, "Skipping malformed summary record");
                continue;
            };
            if best
                .as_ref()
                .map_or(true, |current| record.timestamp >= current.timestamp)
            {
                best = Some(record);
            }
        }
        if let Some(record) = best {
            latest.insert(entity.clone(), record);
        }
    }
    latest
}

fn parse_summary(key: &str, record: &Value) -> Option<SummaryRecord> {
    if !record.is_object() {
        return None;
    }
    let mut parsed: SummaryRecord = serde_json::from_value(record.clone()).ok()?;
    if record.get("timestamp").is_none() {
        parsed.timestamp = key.parse().ok()?;
    }
    Some(parsed)
}

/// Summaries that are new to `memory`: absent, or strictly newer than the
/// remembered one. `memory` is updated for every returned entity.
pub fn diff_summaries(
    latest: BTreeMap<EntityId, SummaryRecord>,
    memory: &mut BTreeMap<EntityId, SummaryRecord>,
) -> BTreeMap<EntityId, SummaryRecord> {
    let changed: BTreeMap<EntityId, SummaryRecord> = latest
        .into_iter()
        .filter(|(entity, record)| {
            memory
                .get(entity)
                .map_or(true, |seen| record.timestamp > seen.timestamp)
        })
        .collect();

    for (entity, record) in &changed {
        memory.insert(entity.clone(), record.clone());
    }
    changed
}

/// Device state per entity. Entities whose record is not a flat map of
/// booleans are omitted.
pub fn device_states(raw: &Map<String, Value>) -> BTreeMap<EntityId, DeviceState> {
    raw.iter()
        .filter_map(|(entity, state)| {
            match serde_json::from_value::<DeviceState>(state.clone()) {
                Ok(state) => Some((entity.clone(), state)),
                Err(e) => {
                    debug!(entity = %entity, error = %e, "Skipping malformed device state");
                    None
                }
            }
        })
        .collect()
}

/// Device states that differ from `memory` (absent, different key set, or a
/// flipped flag). `memory` is updated for every returned entity.
pub fn diff_device_states(
    latest: BTreeMap<EntityId, DeviceState>,
    memory: &mut BTreeMap<EntityId, DeviceState>,
) -> BTreeMap<EntityId, DeviceState> {
    let changed: BTreeMap<EntityId, DeviceState> = latest
        .into_iter()
        .filter(|(entity, state)| memory.get(entity) != Some(state))
        .collect();

    for (entity, state) in &changed {
        memory.insert(entity.clone(), state.clone());
    }
    changed
}

/// Notices with `timestamp >= *watermark`, flattened across entities and
/// ordered by `(timestamp, entity, record key)`.
///
/// When anything is returned the watermark advances to the greatest returned
/// timestamp plus one, so a notice is never delivered twice. Timestamps have
/// one-second granularity: a notice inserted later with a timestamp below the
/// advanced watermark is not delivered.
pub fn new_notices(raw: &Map<String, Value>, watermark: &mut i64) -> Vec<Notice> {
    let mut found: Vec<(i64, &str, &str, Notice)> = Vec::new();
    for (entity, records) in raw {
        let Some(records) = records.as_object() else {
            continue;
        };
        for (key, record) in records {
            let mut notice: Notice = match serde_json::from_value(record.clone()) {
                Ok(notice) => notice,
                Err(e) => {
                    debug!(entity = %entity, key = %key, error = %e, "Skipping malformed notice");
                    continue;
                }
            };
            if notice.timestamp < *watermark {
                continue;
            }
            notice.oficina = Some(entity.clone());
            found.push((notice.timestamp, entity.as_str(), key.as_str(), notice));
        }
    }

    found.sort_by(|a, b| (a.0, a.1, a.2).cmp(&(b.0, b.1, b.2)));

    if let Some(max) = found.iter().map(|(ts, ..)| *ts).max() {
        *watermark = max + 1;
    }
    found.into_iter().map(|(.., notice)| notice).collect()
}

/// Roster of entities (name, sector, retired flag) without their sub-trees
pub fn roster(oficinas: Option<&Value>) -> BTreeMap<EntityId, OfficeInfo> {
    let Some(entities) = oficinas.and_then(Value::as_object) else {
        return BTreeMap::new();
    };
    entities
        .iter()
        .filter_map(|(id, node)| {
            if !node.is_object() {
                return None;
            }
            let info = OfficeInfo {
                nombre: node
                    .get("nombre")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                sector: node
                    .get("sector")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                baja: node.get("baja").and_then(Value::as_bool).unwrap_or(false),
            };
            Some((id.clone(), info))
        })
        .collect()
}

/// Notice-type table keyed by code.
///
/// The database hands back objects with small sequential integer keys as
/// arrays, so both shapes are accepted. Malformed entries are skipped.
pub fn notice_types(snapshot: Option<&Value>) -> BTreeMap<String, NoticeType> {
    let entries: Vec<(String, &Value)> = match snapshot {
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        _ => return BTreeMap::new(),
    };
    entries
        .into_iter()
        .filter_map(|(code, value)| {
            serde_json::from_value::<NoticeType>(value.clone())
                .ok()
                .map(|t| (code, t))
        })
        .collect()
}
