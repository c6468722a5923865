//! Формат сообщений поверх data channel
//!
//! Каждое сообщение — один JSON текст: `{"type": "chat", "text": ..}`,
//! `{"type": "caption", "text": ..}` или `{"type": "gesture", "gesture": ..}`.
//! Неизвестные типы при приёме отбрасываются.

use crate::peer::transport::{ChannelEvent, ChannelHandle};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Тип сообщения
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Chat,
    Caption,
    Gesture,
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Chat => "chat",
            EnvelopeKind::Caption => "caption",
            EnvelopeKind::Gesture => "gesture",
        }
    }

    fn from_wire(kind: &str) -> Option<Self> {
        match kind {
            "chat" => Some(EnvelopeKind::Chat),
            "caption" => Some(EnvelopeKind::Caption),
            "gesture" => Some(EnvelopeKind::Gesture),
            _ => None,
        }
    }
}

/// Одно сообщение приложения
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub payload: String,
}

impl Envelope {
    pub fn new(kind: EnvelopeKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }
}

/// Результат разбора входящего сообщения
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Known(Envelope),
    /// Корректное сообщение неизвестного типа
    Unknown(String),
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gesture: Option<String>,
}

pub fn serialize(envelope: &Envelope) -> Result<String> {
    let mut wire = WireEnvelope {
        kind: envelope.kind.as_str().to_string(),
        text: None,
        gesture: None,
    };
    match envelope.kind {
        EnvelopeKind::Chat | EnvelopeKind::Caption => wire.text = Some(envelope.payload.clone()),
        EnvelopeKind::Gesture => wire.gesture = Some(envelope.payload.clone()),
    }
    Ok(serde_json::to_string(&wire)?)
}

pub fn parse(raw: &str) -> Result<Inbound> {
    let wire: WireEnvelope = serde_json::from_str(raw)?;
    let Some(kind) = EnvelopeKind::from_wire(&wire.kind) else {
        return Ok(Inbound::Unknown(wire.kind));
    };

    let payload = match kind {
        EnvelopeKind::Chat | EnvelopeKind::Caption => wire.text,
        EnvelopeKind::Gesture => wire.gesture,
    }
    .unwrap_or_default();
    Ok(Inbound::Known(Envelope { kind, payload }))
}

/// Обработчик одного типа сообщений
pub type Handler = Box<dyn FnMut(&str) + Send + Sync>;

/// Протокол сообщений, привязанный не более чем к одному data channel
#[derive(Default)]
pub struct MessageChannel {
    channel: Option<Arc<dyn ChannelHandle>>,
    events: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
    open: bool,
    handlers: HashMap<EnvelopeKind, Handler>,
}

impl MessageChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Привязывает канал. Допускается один раз.
    pub fn attach(&mut self, channel: Arc<dyn ChannelHandle>) -> Result<()> {
        if self.channel.is_some() {
            return Err(Error::DataChannelError(format!(
                "already attached, ignoring '{}'",
                channel.label()
            )));
        }
        let events = channel.take_events().ok_or_else(|| {
            Error::DataChannelError(format!("events of '{}' already taken", channel.label()))
        })?;

        debug!("Attached data channel '{}'", channel.label());
        self.channel = Some(channel);
        self.events = Some(events);
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.channel.is_some()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Регистрирует обработчик для `kind`, заменяя прежний
    pub fn on_receive(&mut self, kind: EnvelopeKind, handler: Handler) {
        self.handlers.insert(kind, handler);
    }

    pub async fn send(&self, kind: EnvelopeKind, payload: &str) -> Result<()> {
        let channel = match (&self.channel, self.open) {
            (Some(channel), true) => channel,
            _ => return Err(Error::DataChannelError("channel is not open".into())),
        };
        let text = serialize(&Envelope::new(kind, payload))?;
        channel.send_text(text).await
    }

    /// Разбирает входящее сообщение и вызывает обработчик.
    /// Возвращает обработанный тип.
    pub fn dispatch(&mut self, raw: &str) -> Option<EnvelopeKind> {
        let envelope = match parse(raw) {
            Ok(Inbound::Known(envelope)) => envelope,
            Ok(Inbound::Unknown(kind)) => {
                debug!("Ignoring message of unknown type '{}'", kind);
                return None;
            }
            Err(e) => {
                warn!("Dropping malformed message: {}", e);
                return None;
            }
        };

        let handler = self.handlers.get_mut(&envelope.kind)?;
        handler(&envelope.payload);
        Some(envelope.kind)
    }

    /// Следующее событие канала; без канала ждёт вечно.
    /// Закрытый источник событий один раз читается как `Close`.
    pub async fn next_event(&mut self) -> ChannelEvent {
        let Some(events) = self.events.as_mut() else {
            return std::future::pending().await;
        };
        match events.recv().await {
            Some(event) => event,
            None => {
                self.events = None;
                ChannelEvent::Close
            }
        }
    }

    pub fn handle_event(&mut self, event: &ChannelEvent) {
        match event {
            ChannelEvent::Open => self.open = true,
            ChannelEvent::Message(raw) => {
                self.dispatch(raw);
            }
            ChannelEvent::Close => self.open = false,
        }
    }

    pub async fn close(&mut self) {
        self.open = false;
        self.events = None;
        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                debug!("Closing data channel: {}", e);
            }
        }
    }
}
