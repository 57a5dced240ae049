use crate::relay::protocol::ClientMessage;
use crate::store::StorePath;
use std::fmt;

/// Store location of the global parameters record
pub const PARAMS_PATH: &str = "params";
/// Store location of the notice-type enumeration
pub const NOTICE_TYPES_PATH: &str = "tipos_avisos";
/// Store location of the entity tree
pub const OFFICES_PATH: &str = "oficinas";

/// Fixed broadcast categories, one WebSocket route each
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    Resumenes,
    Avisos,
    Dispositivos,
    Params,
    Oficinas,
    TiposAvisos,
}

impl Topic {
    pub const ALL: [Topic; 6] = [
        Topic::Resumenes,
        Topic::Avisos,
        Topic::Dispositivos,
        Topic::Params,
        Topic::Oficinas,
        Topic::TiposAvisos,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Topic::Resumenes => "resumenes",
            Topic::Avisos => "avisos",
            Topic::Dispositivos => "dispositivos",
            Topic::Params => "params",
            Topic::Oficinas => "oficinas",
            Topic::TiposAvisos => "tipos_avisos",
        }
    }

    /// Upgrade route, e.g. `/ws/resumenes`
    pub fn route(self) -> String {
        format!("/ws/{}", self.name())
    }

    /// Store subtree whose mutations feed this topic
    pub fn watch_path(self) -> StorePath {
        match self {
            Topic::Resumenes | Topic::Avisos | Topic::Dispositivos | Topic::Oficinas => {
                StorePath::from_static(OFFICES_PATH)
            }
            Topic::Params => StorePath::from_static(PARAMS_PATH),
            Topic::TiposAvisos => StorePath::from_static(NOTICE_TYPES_PATH),
        }
    }

    /// Whether a control message may be sent on this topic's channel
    pub fn accepts(self, msg: &ClientMessage) -> bool {
        matches!(
            (self, msg),
            (Topic::Params, ClientMessage::ActualizarParams(_))
                | (Topic::Dispositivos, ClientMessage::ActualizarDispositivo(_))
                | (Topic::Oficinas, ClientMessage::ActualizarOficinas(_))
                | (Topic::Oficinas, ClientMessage::EliminarOficina(_))
        )
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
