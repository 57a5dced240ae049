//! Records held in the snapshot store under the `monitoreo_consumo` namespace.
//!
//! Field names follow the persisted layout, so these types serialize straight
//! to and from the store and onto the wire without renaming.

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Short alphanumeric office key, unique within the store.
pub type EntityId = String;

/// Device flags that every new office starts with.
pub const DEFAULT_DEVICES: [&str; 2] = ["aire", "luces"];

/// One timestamped telemetry snapshot for an office.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryRecord {
    /// Seconds since epoch
    pub timestamp: i64,
    pub corriente_a: f64,
    pub consumo_kvh: f64,
    pub consumo_total_kvh: f64,
    pub min_temp: f64,
    pub max_temp: f64,
    /// Cumulative seconds with presence detected
    pub tiempo_presente: i64,
    pub monto_estimado: f64,
    pub monto_total: f64,
}

/// Immutable event log entry ("aviso").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub timestamp: i64,
    /// Code into the `tipos_avisos` table
    #[serde(default, alias = "tipo", deserialize_with = "string_or_number")]
    pub id_tipo: String,
    #[serde(default)]
    pub adicional: String,
    /// Office the notice was flattened out of; never persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oficina: Option<EntityId>,
}

impl Notice {
    pub fn new(timestamp: i64, id_tipo: impl Into<String>, adicional: impl Into<String>) -> Self {
        Self {
            timestamp,
            id_tipo: id_tipo.into(),
            adicional: adicional.into(),
            oficina: None,
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

/// Flat record of device flags for one office.
///
/// Equality compares the key sets as well as the values, so a flag stored as
/// `false` is not equal to the flag being absent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceState(pub BTreeMap<String, bool>);

impl DeviceState {
    /// All default devices switched on
    pub fn all_on() -> Self {
        Self(
            DEFAULT_DEVICES
                .iter()
                .map(|name| (name.to_string(), true))
                .collect(),
        )
    }

    pub fn get(&self, device: &str) -> Option<bool> {
        self.0.get(device).copied()
    }

    pub fn set(&mut self, device: impl Into<String>, on: bool) {
        self.0.insert(device.into(), on);
    }
}

/// Global operating parameters. Overwritten wholesale on update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    pub hora_inicio: f64,
    pub hora_fin: f64,
    pub umbral_temperatura_ac: f64,
    pub umbral_corriente: f64,
    pub voltaje: f64,
    pub costo_kwh: f64,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            hora_inicio: 8.0,
            hora_fin: 20.0,
            umbral_temperatura_ac: 25.0,
            umbral_corriente: 21.5,
            voltaje: 220.0,
            costo_kwh: 0.25,
        }
    }
}

impl Parameters {
    /// Reject values a dashboard form can produce but the simulators cannot use.
    pub fn validate(&self) -> Result<(), String> {
        let all = [
            self.hora_inicio,
            self.hora_fin,
            self.umbral_temperatura_ac,
            self.umbral_corriente,
            self.voltaje,
            self.costo_kwh,
        ];
        if all.iter().any(|v| !v.is_finite()) {
            return Err("all parameters must be finite numbers".to_string());
        }
        for hour in [self.hora_inicio, self.hora_fin] {
            if !(0.0..=24.0).contains(&hour) {
                return Err(format!("hour {} outside 0..=24", hour));
            }
        }
        if self.voltaje <= 0.0 {
            return Err("voltaje must be positive".to_string());
        }
        if self.umbral_corriente < 0.0 || self.costo_kwh < 0.0 {
            return Err("thresholds and costs must not be negative".to_string());
        }
        Ok(())
    }
}

/// Canned message and severity for a notice code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticeType {
    pub motivo: String,
    pub detalle: String,
    /// 1: success, 2: warning, 3: error
    pub impacto: u8,
}

/// Notice code pushed when an office is added.
pub const NOTICE_OFFICE_ADDED: &str = "10";

/// The fixed enumeration of notice codes.
pub fn default_notice_types() -> BTreeMap<String, NoticeType> {
    let table: [(&str, &str, u8); 13] = [
        ("Luces apagadas", "Estado de luces desactivado", 2),
        ("Luces encendidas", "Detección de presencia", 1),
        ("Luces apagadas", "Ausencia detectada", 2),
        ("Aire apagado", "Estado de aire acondicionado desactivado", 2),
        ("Aire encendido", "Temperatura elevada con presencia", 3),
        ("Aire apagado", "Condiciones para aire no cumplidas", 2),
        ("Consumo anómalo", "Corriente alta sin presencia", 3),
        ("Corte de energía", "Corriente en 0 por corte de energía", 3),
        ("Sensor no responde", "No se recibieron datos del sensor", 3),
        ("Alerta de corriente", "Consumo elevado de amperios", 3),
        ("Oficina agregada", "Se agregó una nueva oficina", 1),
        ("Oficina eliminada", "Se eliminó una oficina", 1),
        ("Configuración modificada", "Se modificó la configuración del sistema", 1),
    ];

    table
        .iter()
        .enumerate()
        .map(|(code, (motivo, detalle, impacto))| {
            (
                code.to_string(),
                NoticeType {
                    motivo: motivo.to_string(),
                    detalle: detalle.to_string(),
                    impacto: *impacto,
                },
            )
        })
        .collect()
}

/// Roster view of an office (no telemetry sub-trees).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfficeInfo {
    pub nombre: String,
    pub sector: String,
    pub baja: bool,
}

/// Persisted shape of a freshly created office node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OfficeNode {
    pub nombre: String,
    pub sector: String,
    pub baja: bool,
    pub estados_dispositivos: DeviceState,
}

impl OfficeNode {
    pub fn new(nombre: impl Into<String>, sector: impl Into<String>) -> Self {
        Self {
            nombre: nombre.into(),
            sector: sector.into(),
            baja: false,
            estados_dispositivos: DeviceState::all_on(),
        }
    }
}

/// Offices created on an empty store.
pub fn default_offices() -> BTreeMap<EntityId, OfficeNode> {
    ["A", "B", "C"]
        .iter()
        .map(|id| {
            (
                id.to_string(),
                OfficeNode::new(format!("Oficina {}", id), "Informatica"),
            )
        })
        .collect()
}

/// Normalize a client-supplied office key: trimmed, upper-cased, ASCII
/// alphanumeric only.
pub fn normalize_entity_id(raw: &str) -> Option<EntityId> {
    let id = raw.trim().to_ascii_uppercase();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(id)
}
