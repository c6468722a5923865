//! Ошибки переговоров и канала сообщений

/// Result с ошибкой крейта
pub type Result<T> = std::result::Result<T, Error>;

/// Ошибки переговоров и звонка
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Код встречи пуст после trim
    #[error("Please enter a meeting id")]
    EmptyJoinCode,

    /// Записи с таким кодом нет
    #[error("Session not found: {0}. Check the id")]
    SessionNotFound(String),

    /// Запись есть, но offer не сохранён
    #[error("Session {0} has no offer yet")]
    MissingOffer(String),

    /// На эту сессию уже ответили
    #[error("Session {0} was already answered, ask the host for a new id")]
    SessionAlreadyAnswered(String),

    /// Транспорт отклонил описание или не создал канал
    #[error("Transport rejected {0}")]
    TransportRejection(String),

    /// Кандидат не применён
    #[error("Candidate rejected: {0}")]
    CandidateRejected(String),

    /// Ошибка хранилища
    #[error("Rendezvous store error: {0}")]
    StoreError(String),

    /// Data channel отсутствует, закрыт или уже привязан
    #[error("Data channel error: {0}")]
    DataChannelError(String),

    /// Неверный параметр конфигурации
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Операция недопустима в текущем состоянии
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Remote description не пришёл вовремя
    #[error("Negotiation timed out after {0} s")]
    NegotiationTimeout(u64),

    /// Соединение не восстановилось за grace period
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Ошибка webrtc-rs
    #[error("WebRTC error: {0}")]
    WebRtcError(#[from] webrtc::Error),

    /// Ошибка сериализации
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl Error {
    /// Неверный ввод; переговоры не начинались
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Error::EmptyJoinCode
                | Error::SessionNotFound(_)
                | Error::MissingOffer(_)
                | Error::SessionAlreadyAnswered(_)
        )
    }

    /// Фатально для текущей сессии
    pub fn is_transport_rejection(&self) -> bool {
        matches!(self, Error::TransportRejection(_) | Error::WebRtcError(_))
    }

    /// Поможет ли новая сессия
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::StoreError(_) | Error::NegotiationTimeout(_) | Error::ConnectionLost(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::SessionNotFound("zzz000".to_string());
        assert_eq!(err.to_string(), "Session not found: zzz000. Check the id");
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::EmptyJoinCode.is_input_error());
        assert!(Error::SessionNotFound("x".into()).is_input_error());
        assert!(!Error::SessionNotFound("x".into()).is_transport_rejection());
        assert!(Error::TransportRejection("offer".into()).is_transport_rejection());
        assert!(Error::NegotiationTimeout(5).is_retryable());
        assert!(!Error::CandidateRejected("stale".into()).is_retryable());
    }
}
