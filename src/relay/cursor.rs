use crate::detector::{self, DEVICES, NOTICES, SUMMARIES};
use crate::model::{DeviceState, EntityId, NoticeType, OfficeInfo, Parameters, SummaryRecord};
use crate::relay::hub::TopicUpdate;
use crate::relay::protocol::ServerMessage;
use crate::relay::topic::Topic;
use serde_json::Value;
use std::collections::BTreeMap;

/// What one connection has already been sent.
///
/// Owned by exactly one connection task and dropped with it. Every method
/// computes the full delta first and only then updates the remembered state,
/// without awaiting in between.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    summaries: BTreeMap<EntityId, SummaryRecord>,
    devices: BTreeMap<EntityId, DeviceState>,
    notice_watermark: i64,
    params: Option<Parameters>,
    roster: BTreeMap<EntityId, OfficeInfo>,
    notice_types: BTreeMap<String, NoticeType>,
}

impl Cursor {
    /// Fresh cursor; notices older than `notice_watermark` are never sent
    pub fn new(notice_watermark: i64) -> Self {
        Self {
            notice_watermark,
            ..Default::default()
        }
    }

    pub fn notice_watermark(&self) -> i64 {
        self.notice_watermark
    }

    /// Next frame for `topic` given the full watched subtree, or `None` when
    /// nothing changed for this connection.
    pub fn delta(&mut self, topic: Topic, snapshot: Option<&Value>) -> Option<ServerMessage> {
        match topic {
            Topic::Resumenes => {
                let latest =
                    detector::latest_per_entity(&detector::project(snapshot, SUMMARIES));
                let changed = detector::diff_summaries(latest, &mut self.summaries);
                (!changed.is_empty()).then_some(ServerMessage::Resumenes(changed))
            }
            Topic::Avisos => {
                let raw = detector::project(snapshot, NOTICES);
                let notices = detector::new_notices(&raw, &mut self.notice_watermark);
                (!notices.is_empty()).then_some(ServerMessage::Avisos(notices))
            }
            Topic::Dispositivos => {
                let latest = detector::device_states(&detector::project(snapshot, DEVICES));
                let changed = detector::diff_device_states(latest, &mut self.devices);
                (!changed.is_empty()).then_some(ServerMessage::Dispositivos(changed))
            }
            Topic::Params => {
                let params = snapshot
                    .and_then(|value| serde_json::from_value::<Parameters>(value.clone()).ok())?;
                self.replace_params(params)
            }
            Topic::Oficinas => self.replace_roster(detector::roster(snapshot)),
            Topic::TiposAvisos => {
                let types = detector::notice_types(snapshot);
                if types == self.notice_types {
                    return None;
                }
                self.notice_types = types.clone();
                Some(ServerMessage::TiposAvisos(types))
            }
        }
    }

    /// Fold a value broadcast after a control message into this cursor.
    pub fn absorb(&mut self, update: &TopicUpdate) -> Option<ServerMessage> {
        match update {
            TopicUpdate::Devices(states) => {
                let changed = detector::diff_device_states(states.clone(), &mut self.devices);
                (!changed.is_empty()).then_some(ServerMessage::Dispositivos(changed))
            }
            TopicUpdate::Params(params) => self.replace_params(params.clone()),
            TopicUpdate::Roster(roster) => self.replace_roster(roster.clone()),
        }
    }

    fn replace_params(&mut self, params: Parameters) -> Option<ServerMessage> {
        if self.params.as_ref() == Some(&params) {
            return None;
        }
        self.params = Some(params.clone());
        Some(ServerMessage::Params(params))
    }

    fn replace_roster(&mut self, roster: BTreeMap<EntityId, OfficeInfo>) -> Option<ServerMessage> {
        if roster == self.roster {
            return None;
        }
        self.roster = roster.clone();
        Some(ServerMessage::Oficinas(roster))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn offices() -> Value {
        json!({
            "A": {
                "nombre": "Oficina A",
                "sector": "Informatica",
                "baja": false,
                "resumenes": {
                    "100": {"timestamp": 100, "corriente_a": 2.0},
                    "200": {"timestamp": 200, "corriente_a": 5.2},
                },
                "avisos": {"k1": {"timestamp": 150, "id_tipo": "9", "adicional": "x"}},
                "estados_dispositivos": {"aire": true, "luces": true},
            }
        })
    }

    #[test]
    fn test_initial_summary_delta_is_latest_only() {
        let mut cursor = Cursor::new(0);
        let Some(ServerMessage::Resumenes(changed)) =
            cursor.delta(Topic::Resumenes, Some(&offices()))
        else {
            panic!("expected summaries");
        };
        assert_eq!(changed.len(), 1);
        assert_eq!(changed["A"].timestamp, 200);
        assert_eq!(changed["A"].corriente_a, 5.2);

        assert!(cursor.delta(Topic::Resumenes, Some(&offices())).is_none());
    }

    #[test]
    fn test_empty_snapshot_sends_nothing() {
        let mut cursor = Cursor::new(0);
        for topic in Topic::ALL {
            assert!(cursor.delta(topic, None).is_none(), "{} sent on empty", topic);
        }
    }

    #[test]
    fn test_notice_watermark_advances() {
        let mut cursor = Cursor::new(100);
        let Some(ServerMessage::Avisos(notices)) = cursor.delta(Topic::Avisos, Some(&offices()))
        else {
            panic!("expected notices");
        };
        assert_eq!(notices.len(), 1);
        assert_eq!(cursor.notice_watermark(), 151);
        assert!(cursor.delta(Topic::Avisos, Some(&offices())).is_none());
    }

    #[test]
    fn test_lookback_hides_old_notices() {
        let mut cursor = Cursor::new(1_000);
        assert!(cursor.delta(Topic::Avisos, Some(&offices())).is_none());
        assert_eq!(cursor.notice_watermark(), 1_000);
    }

    #[test]
    fn test_broadcast_then_store_notification_sends_once() {
        let mut cursor = Cursor::new(0);
        cursor.delta(Topic::Dispositivos, Some(&offices()));

        let mut states = BTreeMap::new();
        states.insert(
            "A".to_string(),
            serde_json::from_value::<DeviceState>(json!({"aire": false, "luces": true})).unwrap(),
        );
        assert!(cursor.absorb(&TopicUpdate::Devices(states)).is_some());

        let mut after = offices();
        after["A"]["estados_dispositivos"]["aire"] = json!(false);
        assert!(cursor.delta(Topic::Dispositivos, Some(&after)).is_none());
    }

    #[test]
    fn test_params_sent_when_changed() {
        let mut cursor = Cursor::new(0);
        let params = serde_json::to_value(Parameters::default()).unwrap();
        assert!(cursor.delta(Topic::Params, Some(&params)).is_some());
        assert!(cursor.delta(Topic::Params, Some(&params)).is_none());

        let mut changed = Parameters::default();
        changed.costo_kwh = 0.3;
        assert!(cursor.absorb(&TopicUpdate::Params(changed)).is_some());
    }

    #[test]
    fn test_malformed_params_ignored() {
        let mut cursor = Cursor::new(0);
        assert!(cursor
            .delta(Topic::Params, Some(&json!({"voltaje": "high"})))
            .is_none());
    }

    #[test]
    fn test_roster_cleared_when_last_office_removed() {
        let mut cursor = Cursor::new(0);
        assert!(cursor.delta(Topic::Oficinas, Some(&offices())).is_some());

        let Some(ServerMessage::Oficinas(roster)) = cursor.delta(Topic::Oficinas, None) else {
            panic!("expected empty roster");
        };
        assert!(roster.is_empty());
    }
}
