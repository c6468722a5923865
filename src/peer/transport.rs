//! Транспорт, которым пользуются переговоры
//!
//! Шифрование, поиск маршрута и управление перегрузкой — забота peer
//! connection. Сессия видит только описания, кандидатов, каналы и события
//! ниже; события идут через mpsc и обрабатываются в задаче сессии.

use crate::peer::types::{CandidatePayload, ConnectionState, DescriptionKind, SessionDescription};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// События транспорта, не связанные с вызовами сессии
pub enum TransportEvent {
    /// Удалённая сторона открыла data channel (у отвечающего)
    IncomingChannel(Arc<dyn ChannelHandle>),
    /// Найден локальный кандидат
    LocalCandidate(CandidatePayload),
    /// Сбор локальных кандидатов завершён
    GatheringComplete,
    /// Пришёл удалённый медиа-трек; медиа обрабатывается снаружи
    RemoteTrackAdded { track_id: String, kind: String },
    /// Изменилось состояние peer connection
    ConnectionStateChanged(ConnectionState),
}

impl std::fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportEvent::IncomingChannel(ch) => {
                f.debug_tuple("IncomingChannel").field(&ch.label()).finish()
            }
            TransportEvent::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            TransportEvent::GatheringComplete => f.write_str("GatheringComplete"),
            TransportEvent::RemoteTrackAdded { track_id, kind } => f
                .debug_struct("RemoteTrackAdded")
                .field("track_id", track_id)
                .field("kind", kind)
                .finish(),
            TransportEvent::ConnectionStateChanged(s) => {
                f.debug_tuple("ConnectionStateChanged").field(s).finish()
            }
        }
    }
}

/// События одного data channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Message(String),
    Close,
}

/// Операции peer connection, нужные для переговоров
#[async_trait]
pub trait Transport: Send + Sync {
    async fn create_local_description(&self, kind: DescriptionKind) -> Result<SessionDescription>;

    async fn apply_local_description(&self, description: &SessionDescription) -> Result<()>;

    async fn apply_remote_description(&self, description: &SessionDescription) -> Result<()>;

    /// Может отказать для устаревших или несовместимых кандидатов
    async fn add_candidate(&self, candidate: &CandidatePayload) -> Result<()>;

    async fn create_channel(&self, label: &str) -> Result<Arc<dyn ChannelHandle>>;

    async fn close(&self) -> Result<()>;
}

/// Надёжный упорядоченный канал сообщений
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    fn label(&self) -> String;

    async fn send_text(&self, text: String) -> Result<()>;

    /// Отдаёт поток событий; получает только первый вызвавший
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ChannelEvent>>;

    async fn close(&self) -> Result<()>;
}
