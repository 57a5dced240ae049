//! Inbound control messages: validate, write to the store, and produce the
//! value to broadcast to every connection on the same topic.

use crate::detector::{self, DEVICES, NOTICES};
use crate::model::{
    normalize_entity_id, DeviceState, EntityId, Notice, OfficeNode, Parameters,
    NOTICE_OFFICE_ADDED,
};
use crate::relay::hub::TopicUpdate;
use crate::relay::protocol::{ClientMessage, DeviceToggle, OfficeRef, OfficeUpsert};
use crate::relay::topic::{Topic, OFFICES_PATH, PARAMS_PATH};
use crate::relay::RelayState;
use crate::store::{get_typed, StoreError, StorePath};
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("{action} is not accepted on the {topic} channel")]
    WrongTopic { action: &'static str, topic: Topic },

    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to encode value: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Apply `msg` received on `topic` and broadcast the resulting value to all
/// open connections on that topic, the sender included.
pub async fn handle_control(
    state: &RelayState,
    topic: Topic,
    msg: ClientMessage,
) -> Result<TopicUpdate, ControlError> {
    if !topic.accepts(&msg) {
        return Err(ControlError::WrongTopic {
            action: msg.action(),
            topic,
        });
    }

    let update = match msg {
        ClientMessage::ActualizarParams(params) => update_params(state, params).await?,
        ClientMessage::ActualizarDispositivo(toggle) => toggle_device(state, toggle).await?,
        ClientMessage::ActualizarOficinas(upsert) => upsert_office(state, upsert).await?,
        ClientMessage::EliminarOficina(office) => delete_office(state, office).await?,
    };

    let reached = state.hub.publish(update.clone());
    info!(topic = %topic, connections = reached, "Control update broadcast");
    Ok(update)
}

fn office_path(id: &str) -> Result<StorePath, ControlError> {
    StorePath::from_static(OFFICES_PATH)
        .child(id)
        .map_err(|_| ControlError::Rejected(format!("invalid office id {:?}", id)))
}

async fn current_roster(state: &RelayState) -> Result<TopicUpdate, ControlError> {
    let offices = state
        .store
        .get(&StorePath::from_static(OFFICES_PATH))
        .await?;
    Ok(TopicUpdate::Roster(detector::roster(offices.as_ref())))
}

async fn update_params(
    state: &RelayState,
    params: Parameters,
) -> Result<TopicUpdate, ControlError> {
    params.validate().map_err(ControlError::Rejected)?;
    state
        .store
        .set(
            &StorePath::from_static(PARAMS_PATH),
            serde_json::to_value(&params)?,
        )
        .await?;
    info!(?params, "Parameters updated");
    Ok(TopicUpdate::Params(params))
}

async fn toggle_device(
    state: &RelayState,
    toggle: DeviceToggle,
) -> Result<TopicUpdate, ControlError> {
    let id = normalize_entity_id(&toggle.oficina)
        .ok_or_else(|| ControlError::Rejected(format!("invalid office id {:?}", toggle.oficina)))?;
    let office = office_path(&id)?;
    if state.retired_ids.contains(&id) || state.store.get(&office).await?.is_none() {
        return Err(ControlError::Rejected(format!("unknown office {}", id)));
    }

    let devices = office.child(DEVICES)?;
    let flag = devices.child(&toggle.dispositivo).map_err(|_| {
        ControlError::Rejected(format!("invalid device name {:?}", toggle.dispositivo))
    })?;
    state.store.set(&flag, Value::Bool(toggle.estado)).await?;
    info!(
        office = %id,
        device = %toggle.dispositivo,
        on = toggle.estado,
        "Device toggled"
    );

    // Broadcast the whole record as it now stands
    let current = match get_typed::<DeviceState>(state.store.as_ref(), &devices).await {
        Ok(Some(current)) => current,
        Ok(None) | Err(_) => {
            warn!(office = %id, "Could not read back device state, broadcasting flag only");
            let mut partial = DeviceState::default();
            partial.set(toggle.dispositivo.clone(), toggle.estado);
            partial
        }
    };

    let mut changed: BTreeMap<EntityId, DeviceState> = BTreeMap::new();
    changed.insert(id, current);
    Ok(TopicUpdate::Devices(changed))
}

async fn upsert_office(
    state: &RelayState,
    upsert: OfficeUpsert,
) -> Result<TopicUpdate, ControlError> {
    let id = normalize_entity_id(&upsert.oficina).ok_or_else(|| {
        ControlError::Rejected(format!(
            "office id {:?} must be alphanumeric",
            upsert.oficina
        ))
    })?;
    if state.retired_ids.contains(&id) {
        return Err(ControlError::Rejected(format!(
            "office id {} was deleted and cannot be reused",
            id
        )));
    }

    let office = office_path(&id)?;
    if state.store.get(&office).await?.is_none() {
        let sector = upsert.sector.unwrap_or_default();
        let mut node = OfficeNode::new(
            upsert
                .nombre
                .unwrap_or_else(|| format!("Oficina {}", id)),
            sector.clone(),
        );
        node.baja = upsert.baja.unwrap_or(false);
        state.store.set(&office, serde_json::to_value(&node)?).await?;
        info!(office = %id, sector = %sector, "Office added");

        let notice = Notice::new(
            Utc::now().timestamp(),
            NOTICE_OFFICE_ADDED,
            format!("Oficina {} ({}) agregada", id, sector),
        );
        if let Err(e) = state
            .store
            .push(&office.child(NOTICES)?, serde_json::to_value(&notice)?)
            .await
        {
            warn!(office = %id, error = %e, "Failed to record office-added notice");
        }
    } else {
        let mut children = Map::new();
        if let Some(nombre) = upsert.nombre {
            children.insert("nombre".to_string(), Value::String(nombre));
        }
        if let Some(sector) = upsert.sector {
            children.insert("sector".to_string(), Value::String(sector));
        }
        if let Some(baja) = upsert.baja {
            children.insert("baja".to_string(), Value::Bool(baja));
        }
        if !children.is_empty() {
            state.store.update(&office, children).await?;
            info!(office = %id, "Office updated");
        }
    }

    current_roster(state).await
}

async fn delete_office(
    state: &RelayState,
    office: OfficeRef,
) -> Result<TopicUpdate, ControlError> {
    let id = normalize_entity_id(&office.oficina)
        .ok_or_else(|| ControlError::Rejected(format!("invalid office id {:?}", office.oficina)))?;
    let path = office_path(&id)?;
    if state.store.get(&path).await?.is_none() {
        return Err(ControlError::Rejected(format!("unknown office {}", id)));
    }

    state.store.remove(&path).await?;
    state.retired_ids.insert(id.clone());
    info!(office = %id, "Office deleted");

    current_roster(state).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;
    use crate::store::{MemoryStore, SnapshotStore};
    use serde_json::json;
    use std::sync::Arc;

    fn relay(tree: Value) -> (RelayState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::with_tree(tree));
        let state = RelayState::new(store.clone(), ChannelConfig::default());
        (state, store)
    }

    fn seeded() -> Value {
        json!({
            "oficinas": {
                "A": {
                    "nombre": "Oficina A",
                    "sector": "Informatica",
                    "baja": false,
                    "estados_dispositivos": {"aire": true, "luces": true},
                },
            },
        })
    }

    fn path(raw: &str) -> StorePath {
        StorePath::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_toggle_device_writes_and_broadcasts_full_record() {
        let (state, store) = relay(seeded());
        let mut rx = state.hub.subscribe(Topic::Dispositivos);

        let msg = ClientMessage::ActualizarDispositivo(DeviceToggle {
            oficina: "A".to_string(),
            dispositivo: "aire".to_string(),
            estado: false,
        });
        handle_control(&state, Topic::Dispositivos, msg).await.unwrap();

        assert_eq!(
            store.get(&path("oficinas/A/estados_dispositivos")).await.unwrap(),
            Some(json!({"aire": false, "luces": true}))
        );
        let TopicUpdate::Devices(changed) = rx.try_recv().unwrap() else {
            panic!("expected device broadcast");
        };
        assert_eq!(changed["A"].get("aire"), Some(false));
        assert_eq!(changed["A"].get("luces"), Some(true));
    }

    #[tokio::test]
    async fn test_toggle_accepts_lowercase_office_id() {
        let (state, store) = relay(seeded());
        let msg = ClientMessage::ActualizarDispositivo(DeviceToggle {
            oficina: " a ".to_string(),
            dispositivo: "luces".to_string(),
            estado: false,
        });
        let update = handle_control(&state, Topic::Dispositivos, msg).await.unwrap();
        let TopicUpdate::Devices(changed) = update else {
            panic!("expected device update");
        };
        assert!(changed.contains_key("A"));
        assert_eq!(
            store.get(&path("oficinas/A/estados_dispositivos/luces")).await.unwrap(),
            Some(json!(false))
        );
        assert_eq!(store.get(&path("oficinas/a")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_toggle_unknown_office_rejected() {
        let (state, store) = relay(seeded());
        let msg = ClientMessage::ActualizarDispositivo(DeviceToggle {
            oficina: "Z".to_string(),
            dispositivo: "aire".to_string(),
            estado: false,
        });
        let err = handle_control(&state, Topic::Dispositivos, msg).await.unwrap_err();
        assert!(matches!(err, ControlError::Rejected(_)));
        assert_eq!(store.get(&path("oficinas/Z")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_wrong_topic_rejected_without_write() {
        let (state, store) = relay(seeded());
        let mut params = Parameters::default();
        params.voltaje = 110.0;

        let msg = ClientMessage::ActualizarParams(params);
        let err = handle_control(&state, Topic::Dispositivos, msg)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::WrongTopic { .. }));
        assert_eq!(store.get(&path("params")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_params_overwritten_wholesale() {
        let (state, store) = relay(json!({"params": {"voltaje": 220.0, "extra": 1}}));
        let mut params = Parameters::default();
        params.costo_kwh = 0.4;

        let msg = ClientMessage::ActualizarParams(params.clone());
        let update = handle_control(&state, Topic::Params, msg).await.unwrap();
        assert_eq!(update, TopicUpdate::Params(params.clone()));

        let stored = store.get(&path("params")).await.unwrap().unwrap();
        assert!(stored.get("extra").is_none());
        assert_eq!(stored["costo_kwh"], 0.4);
    }

    #[tokio::test]
    async fn test_invalid_params_rejected() {
        let (state, store) = relay(json!({}));
        let mut params = Parameters::default();
        params.hora_inicio = -1.0;
        let err = handle_control(&state, Topic::Params, ClientMessage::ActualizarParams(params))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Rejected(_)));
        assert_eq!(store.get(&path("params")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_add_office_creates_defaults_and_notice() {
        let (state, store) = relay(seeded());
        let msg = ClientMessage::ActualizarOficinas(OfficeUpsert {
            oficina: "d1".to_string(),
            nombre: None,
            sector: Some("Contabilidad".to_string()),
            baja: None,
        });
        let update = handle_control(&state, Topic::Oficinas, msg).await.unwrap();
        let TopicUpdate::Roster(roster) = update else {
            panic!("expected roster");
        };
        assert_eq!(roster.len(), 2);
        assert_eq!(roster["D1"].nombre, "Oficina D1");
        assert_eq!(roster["D1"].sector, "Contabilidad");

        let devices = store
            .get(&path("oficinas/D1/estados_dispositivos"))
            .await
            .unwrap();
        assert_eq!(devices, Some(json!({"aire": true, "luces": true})));

        let notices = store.get(&path("oficinas/D1/avisos")).await.unwrap().unwrap();
        let notice = notices.as_object().unwrap().values().next().unwrap();
        assert_eq!(notice["id_tipo"], "10");
    }

    #[tokio::test]
    async fn test_update_existing_office_keeps_sub_trees() {
        let (state, store) = relay(seeded());
        let msg = ClientMessage::ActualizarOficinas(OfficeUpsert {
            oficina: "A".to_string(),
            nombre: None,
            sector: None,
            baja: Some(true),
        });
        handle_control(&state, Topic::Oficinas, msg).await.unwrap();

        assert_eq!(
            store.get(&path("oficinas/A/baja")).await.unwrap(),
            Some(json!(true))
        );
        assert!(store
            .get(&path("oficinas/A/estados_dispositivos"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_deleted_office_id_not_reused() {
        let (state, store) = relay(seeded());
        let delete = ClientMessage::EliminarOficina(OfficeRef {
            oficina: "A".to_string(),
        });
        let update = handle_control(&state, Topic::Oficinas, delete).await.unwrap();
        let TopicUpdate::Roster(roster) = update else {
            panic!("expected roster");
        };
        assert!(roster.is_empty());
        assert_eq!(store.get(&path("oficinas/A")).await.unwrap(), None);

        let re_add = ClientMessage::ActualizarOficinas(OfficeUpsert {
            oficina: "a".to_string(),
            nombre: None,
            sector: None,
            baja: None,
        });
        let err = handle_control(&state, Topic::Oficinas, re_add).await.unwrap_err();
        assert!(matches!(err, ControlError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_delete_unknown_office_rejected() {
        let (state, _store) = relay(seeded());
        let delete = ClientMessage::EliminarOficina(OfficeRef {
            oficina: "Q".to_string(),
        });
        assert!(handle_control(&state, Topic::Oficinas, delete).await.is_err());
    }
}
