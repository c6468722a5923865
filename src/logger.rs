use crate::config::{LogConfig, LOG_ENV_VAR};
use crate::gesture::Symbol;
use crate::session::SessionState;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;

/// Логирование с временными метками. Повторный вызов ничего не делает.
pub fn init_logging(config: &LogConfig) {
    if !config.enabled {
        return;
    }

    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(config.filter.as_str()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
        .with_target(false)
        .try_init();
}

/// Печать ICE-candidate при появлении (Trickle-ICE)
pub fn dump_candidate(label: &str, cand: &RTCIceCandidate) {
    if let Ok(init) = cand.to_json() {
        debug!(
            "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?}",
            init.candidate, init.sdp_mid, init.sdp_mline_index
        );
    }
}

/// События для UI
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Код встречи, который нужно показать пользователю
    JoinCode(String),
    StateChanged(SessionState),
    /// Канал чата открыт
    ChannelOpen,
    Chat(String),
    Caption(String),
    RemoteGesture(String),
    LocalGesture(Symbol),
    RemoteTrack { track_id: String, kind: String },
    ConnectionProblem,
    ConnectionRecovered,
    Failed(String),
    Disconnected,
}

/// Отправка событий наружу; без получателя события только логируются
#[derive(Debug, Clone, Default)]
pub struct Emitter {
    tx: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl Emitter {
    pub fn new(tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: SessionEvent) {
        debug!("emit called with event: {:?}", event);
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                debug!("Event receiver dropped");
            }
        }
    }

    pub fn emit_state(&self, state: SessionState) {
        info!("Session state -> {:?}", state);
        self.emit(SessionEvent::StateChanged(state));
    }

    pub fn emit_connection_problem(&self) {
        warn!("Connection issues detected");
        self.emit(SessionEvent::ConnectionProblem);
    }

    pub fn emit_connection_recovered(&self) {
        info!("Connection recovered");
        self.emit(SessionEvent::ConnectionRecovered);
    }

    pub fn emit_failed(&self, reason: &str) {
        warn!("Session failed: {}", reason);
        self.emit(SessionEvent::Failed(reason.to_string()));
    }

    pub fn emit_disconnected(&self) {
        info!("Session disconnected");
        self.emit(SessionEvent::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_emitter_is_silent() {
        Emitter::detached().emit(SessionEvent::ChannelOpen);
    }

    #[test]
    fn emitter_forwards_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let emitter = Emitter::new(tx);
        emitter.emit(SessionEvent::Chat("hi".into()));
        emitter.emit_disconnected();
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Chat("hi".into()));
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Disconnected);
    }
}
