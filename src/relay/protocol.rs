use crate::model::{
    DeviceState, EntityId, Notice, NoticeType, OfficeInfo, Parameters, SummaryRecord,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Server → Client frame: `{ "tipo": ..., "data": ... }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tipo", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Changed entities only
    Resumenes(BTreeMap<EntityId, SummaryRecord>),
    /// New notices in timestamp order
    Avisos(Vec<Notice>),
    /// Changed entities only
    Dispositivos(BTreeMap<EntityId, DeviceState>),
    Params(Parameters),
    /// Full roster
    Oficinas(BTreeMap<EntityId, OfficeInfo>),
    TiposAvisos(BTreeMap<String, NoticeType>),
    /// Sent only to the connection whose control message failed
    Error(ErrorPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub accion: String,
    pub mensaje: String,
}

/// Client → Server control message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tipo", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    ActualizarParams(Parameters),
    ActualizarDispositivo(DeviceToggle),
    ActualizarOficinas(OfficeUpsert),
    EliminarOficina(OfficeRef),
}

impl ClientMessage {
    pub fn action(&self) -> &'static str {
        match self {
            ClientMessage::ActualizarParams(_) => "actualizar_params",
            ClientMessage::ActualizarDispositivo(_) => "actualizar_dispositivo",
            ClientMessage::ActualizarOficinas(_) => "actualizar_oficinas",
            ClientMessage::EliminarOficina(_) => "eliminar_oficina",
        }
    }
}

/// Switch one device flag of one office
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceToggle {
    pub oficina: EntityId,
    pub dispositivo: String,
    pub estado: bool,
}

/// Add an office, or update the roster fields of an existing one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfficeUpsert {
    pub oficina: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nombre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baja: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfficeRef {
    pub oficina: EntityId,
}
