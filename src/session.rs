//! Конечный автомат переговоров
//!
//! Один `Session` владеет всем, что нужно звонку: очередью кандидатов,
//! каналом сообщений и подавлением повторов жестов. Колбэки транспорта,
//! уведомления хранилища, события канала и все таймеры обрабатываются по
//! одному в `step`/`run`; общего состояния между задачами нет.

use crate::config::SessionConfig;
use crate::gesture::{Announcer, GestureDebouncer, GestureState, LandmarkFrame, Symbol};
use crate::logger::{Emitter, SessionEvent};
use crate::peer::ice::{analyze_candidates, CandidateQueue};
use crate::peer::transport::{ChannelEvent, Transport, TransportEvent};
use crate::peer::types::{
    Candidate, CandidatePayload, ConnectionState, DescriptionKind, Role, SessionDescription,
};
use crate::protocol::{EnvelopeKind, MessageChannel};
use crate::signaling::{CallRecord, Field, RendezvousStore, SubCollection, Subscription};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Состояние переговоров
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    LocalDescribing,
    AwaitingRemote,
    Established,
    Failed,
    Closed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Closed)
    }
}

/// Команды для запущенной сессии
#[derive(Debug, Clone)]
pub enum SessionCommand {
    Chat(String),
    Caption(String),
    /// Кисти из одного тика детектора, первая — основная
    Hands(Vec<LandmarkFrame>),
    Hangup,
}

/// Handle сессии, запущенной через `Session::spawn`
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn send_chat(&self, text: impl Into<String>) -> bool {
        self.tx.send(SessionCommand::Chat(text.into())).is_ok()
    }

    pub fn send_caption(&self, text: impl Into<String>) -> bool {
        self.tx.send(SessionCommand::Caption(text.into())).is_ok()
    }

    pub fn submit_hands(&self, hands: Vec<LandmarkFrame>) -> bool {
        self.tx.send(SessionCommand::Hands(hands)).is_ok()
    }

    pub fn hangup(&self) -> bool {
        self.tx.send(SessionCommand::Hangup).is_ok()
    }
}

enum Input {
    Transport(TransportEvent),
    Record(CallRecord),
    RemoteCandidate(CandidatePayload),
    Channel(ChannelEvent),
    TransportClosed,
    RecordFeedClosed,
    CandidateFeedClosed,
    NegotiationTimeout,
    GraceExpired,
    CooldownOver,
}

/// Один звонок: переговоры и получившееся соединение
pub struct Session {
    config: SessionConfig,
    store: Arc<dyn RendezvousStore>,
    transport: Arc<dyn Transport>,
    transport_events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    emitter: Emitter,
    announcer: Option<Arc<dyn Announcer>>,

    session_id: Option<String>,
    role: Option<Role>,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    state: SessionState,

    candidates: CandidateQueue,
    messages: MessageChannel,
    gestures: GestureDebouncer,

    record_feed: Option<Subscription<CallRecord>>,
    candidate_feed: Option<Subscription<CandidatePayload>>,
    // локальные кандидаты, появившиеся до получения id записи
    pending_local: Vec<CandidatePayload>,
    local_candidates: Vec<CandidatePayload>,
    negotiation_deadline: Option<Instant>,
    grace_deadline: Option<Instant>,
    released: bool,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn RendezvousStore>,
        transport: Arc<dyn Transport>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        emitter: Emitter,
    ) -> Self {
        let gestures = GestureDebouncer::new(config.gesture_cooldown());
        let mut session = Self {
            config,
            store,
            transport,
            transport_events: Some(transport_events),
            emitter,
            announcer: None,
            session_id: None,
            role: None,
            local_description: None,
            remote_description: None,
            state: SessionState::Idle,
            candidates: CandidateQueue::new(),
            messages: MessageChannel::new(),
            gestures,
            record_feed: None,
            candidate_feed: None,
            pending_local: Vec::new(),
            local_candidates: Vec::new(),
            negotiation_deadline: None,
            grace_deadline: None,
            released: false,
        };
        session.install_handlers();
        session
    }

    /// Озвучивание жестов. Без него жесты только отправляются и
    /// публикуются событиями.
    pub fn with_announcer(mut self, announcer: Arc<dyn Announcer>) -> Self {
        self.announcer = Some(announcer);
        self.install_handlers();
        self
    }

    fn install_handlers(&mut self) {
        let emitter = self.emitter.clone();
        self.messages.on_receive(
            EnvelopeKind::Chat,
            Box::new(move |text: &str| emitter.emit(SessionEvent::Chat(text.to_string()))),
        );

        let emitter = self.emitter.clone();
        self.messages.on_receive(
            EnvelopeKind::Caption,
            Box::new(move |text: &str| emitter.emit(SessionEvent::Caption(text.to_string()))),
        );

        let emitter = self.emitter.clone();
        let announcer = self.announcer.clone();
        self.messages.on_receive(
            EnvelopeKind::Gesture,
            Box::new(move |gesture: &str| {
                emitter.emit(SessionEvent::RemoteGesture(gesture.to_string()));
                if let Some(announcer) = &announcer {
                    announcer.announce(&format!("Remote user says {}", gesture));
                }
            }),
        );
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Код встречи, когда запись уже создана
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    pub fn candidate_queue(&self) -> &CandidateQueue {
        &self.candidates
    }

    pub fn messages(&self) -> &MessageChannel {
        &self.messages
    }

    pub fn gesture_state(&self) -> GestureState {
        self.gestures.state()
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            self.state = state;
            self.emitter.emit_state(state);
        }
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(Error::InvalidState(format!(
                "session already started ({:?})",
                self.state
            )));
        }
        Ok(())
    }

    // ========== INITIATOR ==========

    /// Создаёт запись, публикует offer и подписывается на answer.
    /// Возвращает код встречи.
    pub async fn start_as_initiator(&mut self) -> Result<String> {
        self.ensure_idle()?;

        let id = self.store.create_record().await?;
        info!("Created call record {}", id);
        self.session_id = Some(id.clone());
        self.role = Some(Role::Initiator);
        self.emitter.emit(SessionEvent::JoinCode(id.clone()));
        self.set_state(SessionState::LocalDescribing);

        if let Err(e) = self.describe_as_initiator(&id).await {
            return Err(self.fail(e).await);
        }
        self.flush_pending_local().await;

        self.set_state(SessionState::AwaitingRemote);
        self.negotiation_deadline = self
            .config
            .negotiation_timeout()
            .map(|timeout| Instant::now() + timeout);
        Ok(id)
    }

    async fn describe_as_initiator(&mut self, id: &str) -> Result<()> {
        let channel = self
            .transport
            .create_channel(&self.config.channel_label)
            .await?;
        self.messages.attach(channel)?;

        let offer = self
            .transport
            .create_local_description(DescriptionKind::Offer)
            .await?;
        self.transport.apply_local_description(&offer).await?;
        self.store.set_field(id, Field::Offer, offer.clone()).await?;
        self.local_description = Some(offer);

        self.record_feed = Some(self.store.subscribe_record(id).await?);
        self.candidate_feed = Some(
            self.store
                .subscribe_candidates(id, SubCollection::peer(Role::Initiator))
                .await?,
        );
        Ok(())
    }

    // ========== RESPONDER ==========

    /// Находит запись, отвечает на offer и подписывается на кандидатов
    /// инициатора. При ошибке ввода сессия остаётся `Idle`.
    pub async fn start_as_responder(&mut self, join_code: &str) -> Result<()> {
        self.ensure_idle()?;

        let code = join_code.trim();
        if code.is_empty() {
            return Err(Error::EmptyJoinCode);
        }
        let record = self
            .store
            .get_record(code)
            .await?
            .ok_or_else(|| Error::SessionNotFound(code.to_string()))?;
        if record.answer.is_some() {
            return Err(Error::SessionAlreadyAnswered(code.to_string()));
        }
        let offer = record
            .offer
            .ok_or_else(|| Error::MissingOffer(code.to_string()))?;

        info!("Joining call {}", code);
        self.session_id = Some(code.to_string());
        self.role = Some(Role::Responder);
        self.emitter.emit(SessionEvent::JoinCode(code.to_string()));
        self.set_state(SessionState::LocalDescribing);

        if let Err(e) = self.describe_as_responder(code, offer).await {
            return Err(self.fail(e).await);
        }
        self.flush_pending_local().await;

        // подтверждением служит открытие data channel
        self.set_state(SessionState::Established);
        Ok(())
    }

    async fn describe_as_responder(&mut self, id: &str, offer: SessionDescription) -> Result<()> {
        self.apply_remote_description(offer).await?;

        let answer = self
            .transport
            .create_local_description(DescriptionKind::Answer)
            .await?;
        self.transport.apply_local_description(&answer).await?;
        self.store.set_field(id, Field::Answer, answer.clone()).await?;
        self.local_description = Some(answer);

        self.candidate_feed = Some(
            self.store
                .subscribe_candidates(id, SubCollection::peer(Role::Responder))
                .await?,
        );
        Ok(())
    }

    // ========== SHARED ==========

    /// Применяет remote description один раз; повторные вызовы ничего не
    /// делают и возвращают `Ok(false)`. Открывает очередь кандидатов.
    pub async fn apply_remote_description(&mut self, description: SessionDescription) -> Result<bool> {
        if self.remote_description.is_some() {
            debug!("Remote description already set, ignoring");
            return Ok(false);
        }

        self.transport.apply_remote_description(&description).await?;
        info!("Remote {} applied", description.kind);
        self.remote_description = Some(description);

        self.candidates.mark_ready();
        self.candidates
            .drain_if_ready(self.transport.as_ref())
            .await;
        Ok(true)
    }

    /// Изменение записи (здесь инициатор ждёт answer)
    pub async fn handle_record(&mut self, record: CallRecord) -> Result<()> {
        if self.state.is_terminal() || self.role != Some(Role::Initiator) {
            return Ok(());
        }
        let Some(answer) = record.answer else {
            return Ok(());
        };

        match self.apply_remote_description(answer).await {
            Ok(true) => {
                self.negotiation_deadline = None;
                self.set_state(SessionState::Established);
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// Новый кандидат другой стороны
    pub async fn handle_remote_candidate(&mut self, payload: CandidatePayload) {
        if self.state.is_terminal() {
            return;
        }
        let session_id = self.session_id.clone().unwrap_or_default();
        self.candidates
            .enqueue(Candidate::remote(session_id, payload), self.transport.as_ref())
            .await;
    }

    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        if self.state.is_terminal() {
            debug!("Ignoring transport event after teardown: {:?}", event);
            return;
        }

        match event {
            TransportEvent::IncomingChannel(channel) => {
                if let Err(e) = self.messages.attach(channel) {
                    warn!("Incoming data channel not attached: {}", e);
                }
            }
            TransportEvent::LocalCandidate(payload) => {
                self.local_candidates.push(payload.clone());
                self.publish_local_candidate(payload).await;
            }
            TransportEvent::GatheringComplete => {
                analyze_candidates(&self.local_candidates);
            }
            TransportEvent::RemoteTrackAdded { track_id, kind } => {
                self.emitter
                    .emit(SessionEvent::RemoteTrack { track_id, kind });
            }
            TransportEvent::ConnectionStateChanged(state) => self.on_connection_state(state),
        }
    }

    async fn publish_local_candidate(&mut self, payload: CandidatePayload) {
        let (Some(id), Some(role)) = (self.session_id.clone(), self.role) else {
            self.pending_local.push(payload);
            return;
        };
        let candidate = Candidate::local(id, payload);
        if let Err(e) = self
            .store
            .append_candidate(&candidate.session_id, SubCollection::own(role), candidate.payload)
            .await
        {
            warn!("Failed to publish local candidate: {}", e);
        }
    }

    async fn flush_pending_local(&mut self) {
        for payload in std::mem::take(&mut self.pending_local) {
            self.publish_local_candidate(payload).await;
        }
    }

    fn on_connection_state(&mut self, state: ConnectionState) {
        match state {
            ConnectionState::Connected => {
                if self.grace_deadline.take().is_some() {
                    self.emitter.emit_connection_recovered();
                }
            }
            ConnectionState::Disconnected | ConnectionState::Failed => {
                if self.state == SessionState::Idle || self.grace_deadline.is_some() {
                    return;
                }
                info!(
                    "Peer connection {:?} - starting {} s grace period",
                    state,
                    self.config.grace_period().as_secs()
                );
                self.grace_deadline = Some(Instant::now() + self.config.grace_period());
                self.emitter.emit_connection_problem();
            }
            _ => debug!("Peer connection state: {:?}", state),
        }
    }

    pub fn handle_channel_event(&mut self, event: ChannelEvent) {
        if self.state.is_terminal() {
            return;
        }
        self.messages.handle_event(&event);
        match event {
            ChannelEvent::Open => self.emitter.emit(SessionEvent::ChannelOpen),
            ChannelEvent::Close => self.emitter.emit_disconnected(),
            ChannelEvent::Message(_) => {}
        }
    }

    // ========== APPLICATION MESSAGES ==========

    pub async fn send_chat(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        self.messages.send(EnvelopeKind::Chat, text).await
    }

    /// Субтитры от распознавания речи; при закрытом канале теряются
    pub async fn send_caption(&self, text: &str) -> Result<()> {
        self.messages.send(EnvelopeKind::Caption, text).await
    }

    /// Классифицирует тик детектора; новый символ озвучивается и
    /// отправляется собеседнику.
    pub async fn on_hand_frames(&mut self, hands: &[LandmarkFrame]) -> Option<Symbol> {
        if self.state.is_terminal() {
            return None;
        }
        let symbol = self.gestures.on_frame_result(hands)?;

        self.emitter.emit(SessionEvent::LocalGesture(symbol));
        if let Some(announcer) = &self.announcer {
            announcer.announce(symbol.label());
        }
        if let Err(e) = self.messages.send(EnvelopeKind::Gesture, symbol.label()).await {
            debug!("Gesture {} not sent: {}", symbol, e);
        }
        Some(symbol)
    }

    // ========== TEARDOWN ==========

    /// Завершение звонка пользователем: единственный путь в `Closed`
    pub async fn hangup(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        info!("Hanging up");
        self.release().await;
        self.set_state(SessionState::Closed);
        self.emitter.emit_disconnected();
    }

    async fn fail(&mut self, error: Error) -> Error {
        if self.state.is_terminal() {
            return error;
        }
        self.set_state(SessionState::Failed);
        self.emitter.emit_failed(&error.to_string());
        self.release().await;
        error
    }

    async fn release(&mut self) {
        self.record_feed = None;
        self.candidate_feed = None;
        self.transport_events = None;
        self.negotiation_deadline = None;
        self.grace_deadline = None;
        self.gestures.cancel();
        self.candidates.clear();

        if self.released {
            return;
        }
        self.released = true;
        self.messages.close().await;
        if let Err(e) = self.transport.close().await {
            warn!("Failed to close transport: {}", e);
        }
    }

    // ========== EVENT LOOP ==========

    async fn next_input(&mut self) -> Input {
        let negotiation = self.negotiation_deadline;
        let grace = self.grace_deadline;
        let cooldown = self.gestures.deadline();
        tokio::select! {
            event = recv_opt(&mut self.transport_events) => {
                event.map_or(Input::TransportClosed, Input::Transport)
            }
            record = recv_feed(&mut self.record_feed) => {
                record.map_or(Input::RecordFeedClosed, Input::Record)
            }
            candidate = recv_feed(&mut self.candidate_feed) => {
                candidate.map_or(Input::CandidateFeedClosed, Input::RemoteCandidate)
            }
            event = self.messages.next_event() => Input::Channel(event),
            _ = sleep_until_opt(negotiation) => Input::NegotiationTimeout,
            _ = sleep_until_opt(grace) => Input::GraceExpired,
            _ = sleep_until_opt(cooldown) => Input::CooldownOver,
        }
    }

    async fn handle_input(&mut self, input: Input) -> Result<()> {
        match input {
            Input::Transport(event) => self.handle_transport_event(event).await,
            Input::Record(record) => self.handle_record(record).await?,
            Input::RemoteCandidate(payload) => self.handle_remote_candidate(payload).await,
            Input::Channel(event) => self.handle_channel_event(event),
            Input::TransportClosed => {
                debug!("Transport event source closed");
                self.transport_events = None;
            }
            Input::RecordFeedClosed => {
                warn!("Record subscription ended");
                self.record_feed = None;
            }
            Input::CandidateFeedClosed => {
                warn!("Candidate subscription ended");
                self.candidate_feed = None;
            }
            Input::NegotiationTimeout => {
                self.negotiation_deadline = None;
                let secs = self.config.negotiation_timeout_secs.unwrap_or_default();
                return Err(self.fail(Error::NegotiationTimeout(secs)).await);
            }
            Input::CooldownOver => self.gestures.expire(),
            Input::GraceExpired => {
                self.grace_deadline = None;
                let reason = format!(
                    "no recovery within {} s",
                    self.config.grace_period().as_secs()
                );
                return Err(self.fail(Error::ConnectionLost(reason)).await);
            }
        }
        Ok(())
    }

    /// Ждёт и обрабатывает следующее событие. `Ok(false)` — сессия
    /// завершена или упала.
    pub async fn step(&mut self) -> Result<bool> {
        if self.state.is_terminal() {
            return Ok(false);
        }
        let input = self.next_input().await;
        self.handle_input(input).await?;
        Ok(!self.state.is_terminal())
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Chat(text) => {
                if let Err(e) = self.send_chat(&text).await {
                    warn!("Chat message not sent: {}", e);
                }
            }
            SessionCommand::Caption(text) => {
                if let Err(e) = self.send_caption(&text).await {
                    debug!("Caption dropped: {}", e);
                }
            }
            SessionCommand::Hands(hands) => {
                self.on_hand_frames(&hands).await;
            }
            SessionCommand::Hangup => self.hangup().await,
        }
    }

    /// Цикл сессии до hangup. Закрытый канал команд тоже означает hangup.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        while self.state != SessionState::Closed {
            let active = !self.state.is_terminal();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => self.hangup().await,
                },
                input = self.next_input(), if active => {
                    if let Err(e) = self.handle_input(input).await {
                        warn!("Session error: {}", e);
                    }
                }
            }
        }
    }

    /// Запускает сессию в отдельной задаче
    pub fn spawn(self) -> (SessionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(rx));
        (SessionHandle { tx }, task)
    }
}

async fn recv_opt<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn recv_feed<T>(feed: &mut Option<Subscription<T>>) -> Option<T> {
    match feed {
        Some(feed) => feed.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
