#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use symphony_lib::gesture::{Announcer, LandmarkFrame, Point, LANDMARK_COUNT};
use symphony_lib::peer::{
    CandidatePayload, ChannelEvent, ChannelHandle, Transport, TransportEvent,
};
use symphony_lib::peer::types::{DescriptionKind, SessionDescription};
use symphony_lib::{Emitter, Error, RendezvousStore, Result, Session, SessionConfig, SessionEvent};
use tokio::sync::mpsc;

pub fn candidate(text: &str) -> CandidatePayload {
    CandidatePayload {
        candidate: format!("candidate:{} 1 udp 2122260223 192.168.1.2 5000 typ host", text),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
    }
}

pub struct FakeChannel {
    label: String,
    sent: Mutex<Vec<String>>,
    tx: mpsc::UnboundedSender<ChannelEvent>,
    events: Mutex<Option<mpsc::UnboundedReceiver<ChannelEvent>>>,
    closed: AtomicBool,
}

impl FakeChannel {
    pub fn new(label: &str) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            label: label.to_string(),
            sent: Mutex::new(Vec::new()),
            tx,
            events: Mutex::new(Some(rx)),
            closed: AtomicBool::new(false),
        })
    }

    /// Событие, как будто его породила удалённая сторона
    pub fn push(&self, event: ChannelEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelHandle for FakeChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    async fn send_text(&self, text: String) -> Result<()> {
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ChannelEvent>> {
        self.events.lock().unwrap().take()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Транспорт, записывающий все вызовы. Кандидаты до remote description
/// отклоняются, как в настоящем peer connection.
pub struct FakeTransport {
    calls: Mutex<Vec<String>>,
    applied: Mutex<Vec<String>>,
    channels: Mutex<Vec<Arc<FakeChannel>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    remote_set: AtomicBool,
    reject_remote: AtomicBool,
    closed: AtomicBool,
}

impl FakeTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            applied: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            events: tx,
            remote_set: AtomicBool::new(false),
            reject_remote: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        (transport, rx)
    }

    /// `false`, если сессия уже отпустила приёмник событий
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn reject_remote_descriptions(&self) {
        self.reject_remote.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Применённые кандидаты по порядку
    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }

    pub fn channel(&self) -> Option<Arc<FakeChannel>> {
        self.channels.lock().unwrap().first().cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn create_local_description(&self, kind: DescriptionKind) -> Result<SessionDescription> {
        self.record(format!("create {}", kind));
        Ok(SessionDescription {
            kind,
            body: format!("fake-{}", kind),
        })
    }

    async fn apply_local_description(&self, description: &SessionDescription) -> Result<()> {
        self.record(format!("local {}", description.kind));
        Ok(())
    }

    async fn apply_remote_description(&self, description: &SessionDescription) -> Result<()> {
        self.record(format!("remote {}", description.kind));
        if self.reject_remote.load(Ordering::SeqCst) {
            return Err(Error::TransportRejection(format!(
                "remote {}: bad fingerprint",
                description.kind
            )));
        }
        self.remote_set.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn add_candidate(&self, candidate: &CandidatePayload) -> Result<()> {
        if !self.remote_set.load(Ordering::SeqCst) {
            return Err(Error::CandidateRejected("no remote description".into()));
        }
        if candidate.candidate.contains("stale") {
            return Err(Error::CandidateRejected("unknown ufrag".into()));
        }
        self.applied
            .lock()
            .unwrap()
            .push(candidate.candidate.clone());
        Ok(())
    }

    async fn create_channel(&self, label: &str) -> Result<Arc<dyn ChannelHandle>> {
        self.record(format!("channel {}", label));
        let channel = FakeChannel::new(label);
        self.channels.lock().unwrap().push(channel.clone());
        Ok(channel as Arc<dyn ChannelHandle>)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingAnnouncer {
    spoken: Mutex<Vec<String>>,
}

impl RecordingAnnouncer {
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

impl Announcer for RecordingAnnouncer {
    fn announce(&self, text: &str) {
        self.spoken.lock().unwrap().push(text.to_string());
    }
}

pub struct Peer {
    pub session: Session,
    pub transport: Arc<FakeTransport>,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Peer {
    pub fn new(config: SessionConfig, store: Arc<dyn RendezvousStore>) -> Self {
        let (transport, transport_events) = FakeTransport::new();
        let (tx, events) = mpsc::unbounded_channel();
        let session = Session::new(
            config,
            store,
            transport.clone(),
            transport_events,
            Emitter::new(tx),
        );
        Self {
            session,
            transport,
            events,
        }
    }

    /// Накопленные события
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    /// Шагает, пока не выполнится `done`; паника при ошибке или через 5 с
    pub async fn step_until(&mut self, done: impl Fn(&Session) -> bool) {
        let session = &mut self.session;
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done(session) {
                session.step().await.unwrap();
            }
        })
        .await
        .expect("condition not reached");
    }

    /// Шагает до первой ошибки сессии
    pub async fn step_until_err(&mut self) -> Error {
        loop {
            match self.session.step().await {
                Ok(true) => continue,
                Ok(false) => panic!("session ended without an error"),
                Err(e) => return e,
            }
        }
    }
}

/// Правая кисть с разогнутыми пальцами (указательный, средний, безымянный,
/// мизинец) и прижатым большим.
pub fn hand(extended: [bool; 4]) -> LandmarkFrame {
    let mut pts = vec![Point::new(0.0, 0.0); LANDMARK_COUNT];
    pts[0] = Point::new(0.5, 0.9);
    pts[1] = Point::new(0.6, 0.8);
    pts[2] = Point::new(0.65, 0.7);
    pts[3] = Point::new(0.7, 0.65);
    pts[4] = Point::new(0.72, 0.67);

    for (f, tip) in [8usize, 12, 16, 20].into_iter().enumerate() {
        let x = 0.35 + 0.1 * f as f32;
        pts[tip - 3] = Point::new(x, 0.6);
        pts[tip - 2] = Point::new(x, 0.5);
        if extended[f] {
            pts[tip - 1] = Point::new(x, 0.4);
            pts[tip] = Point::new(x, 0.3);
        } else {
            pts[tip - 1] = Point::new(x, 0.55);
            pts[tip] = Point::new(x, 0.62);
        }
    }
    LandmarkFrame::new(pts)
}
