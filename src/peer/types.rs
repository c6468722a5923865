use serde::{Deserialize, Serialize};
use std::fmt;

/// Роль участника в переговорах
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Initiator,
    Responder,
}

/// Тип описания сессии
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionKind {
    Offer,
    Answer,
}

impl fmt::Display for DescriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptionKind::Offer => f.write_str("offer"),
            DescriptionKind::Answer => f.write_str("answer"),
        }
    }
}

/// Описание сессии (SDP) в том виде, в каком оно хранится в записи
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: DescriptionKind,
    #[serde(rename = "sdp")]
    pub body: String,
}

impl SessionDescription {
    pub fn offer(body: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Offer,
            body: body.into(),
        }
    }

    pub fn answer(body: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Answer,
            body: body.into(),
        }
    }
}

/// Откуда пришёл кандидат
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Local,
    Remote,
}

/// Полезная нагрузка ICE кандидата (trickle-ICE JSON)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePayload {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}

/// ICE кандидат, привязанный к сессии
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub origin: Origin,
    pub payload: CandidatePayload,
    pub session_id: String,
}

impl Candidate {
    pub fn remote(session_id: impl Into<String>, payload: CandidatePayload) -> Self {
        Self {
            origin: Origin::Remote,
            payload,
            session_id: session_id.into(),
        }
    }

    pub fn local(session_id: impl Into<String>, payload: CandidatePayload) -> Self {
        Self {
            origin: Origin::Local,
            payload,
            session_id: session_id.into(),
        }
    }
}

/// Конфигурация ICE сервера
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// Состояние транспорта, как его сообщает peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}
