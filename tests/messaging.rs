mod common;

use common::{hand, FakeChannel, Peer, RecordingAnnouncer};
use std::sync::Arc;
use std::time::Duration;
use symphony_lib::peer::{ChannelEvent, SessionDescription, TransportEvent};
use symphony_lib::signaling::CallRecord;
use symphony_lib::{InMemoryStore, SessionConfig, SessionEvent, SessionState, Symbol};

/// Отвечающая сторона с открытым data channel
async fn connected(announcer: Option<Arc<RecordingAnnouncer>>) -> (Peer, Arc<FakeChannel>) {
    let store = Arc::new(InMemoryStore::new());
    store.insert_record(
        "abc123",
        CallRecord {
            offer: Some(SessionDescription::offer("fake-offer")),
            answer: None,
        },
    );

    let Peer {
        mut session,
        transport,
        events,
    } = Peer::new(SessionConfig::default(), store);
    if let Some(announcer) = announcer {
        session = session.with_announcer(announcer);
    }
    let mut peer = Peer {
        session,
        transport,
        events,
    };

    peer.session.start_as_responder("abc123").await.unwrap();
    let channel = FakeChannel::new("symphony-data");
    peer.transport
        .emit(TransportEvent::IncomingChannel(channel.clone()));
    peer.session.step().await.unwrap();
    assert!(peer.session.messages().is_attached());

    channel.push(ChannelEvent::Open);
    peer.session.step().await.unwrap();
    assert!(peer.session.messages().is_open());
    assert!(peer.drain_events().contains(&SessionEvent::ChannelOpen));
    (peer, channel)
}

#[tokio::test]
async fn chat_and_captions_go_out_as_envelopes() {
    let (peer, channel) = connected(None).await;

    peer.session.send_chat("  hi there ").await.unwrap();
    peer.session.send_chat("   ").await.unwrap();
    peer.session.send_caption("nice to meet you").await.unwrap();

    assert_eq!(
        channel.sent(),
        vec![
            r#"{"type":"chat","text":"hi there"}"#.to_string(),
            r#"{"type":"caption","text":"nice to meet you"}"#.to_string(),
        ]
    );
}

#[tokio::test]
async fn inbound_envelopes_become_events() {
    let announcer = Arc::new(RecordingAnnouncer::default());
    let (mut peer, channel) = connected(Some(announcer.clone())).await;

    for raw in [
        r#"{"type":"chat","text":"yo"}"#,
        r#"{"type":"reaction","emoji":"+1"}"#,
        r#"{"type":"caption","text":"hello"}"#,
        "not json",
        r#"{"type":"gesture","gesture":"V"}"#,
    ] {
        channel.push(ChannelEvent::Message(raw.to_string()));
        peer.session.step().await.unwrap();
    }

    assert_eq!(
        peer.drain_events(),
        vec![
            SessionEvent::Chat("yo".into()),
            SessionEvent::Caption("hello".into()),
            SessionEvent::RemoteGesture("V".into()),
        ]
    );
    assert_eq!(announcer.spoken(), vec!["Remote user says V"]);
    assert_eq!(peer.session.state(), SessionState::Established);
}

#[tokio::test(start_paused = true)]
async fn local_gestures_are_debounced_then_sent() {
    let announcer = Arc::new(RecordingAnnouncer::default());
    let (mut peer, channel) = connected(Some(announcer.clone())).await;
    let v = vec![hand([true, true, false, false])];
    let b = vec![hand([true; 4])];

    assert_eq!(peer.session.on_hand_frames(&v).await, Some(Symbol::V));
    assert_eq!(peer.session.on_hand_frames(&v).await, None);
    assert_eq!(peer.session.on_hand_frames(&b).await, None);

    tokio::time::sleep(Duration::from_millis(3001)).await;
    assert_eq!(peer.session.on_hand_frames(&b).await, Some(Symbol::B));

    assert_eq!(
        channel.sent(),
        vec![
            r#"{"type":"gesture","gesture":"V"}"#.to_string(),
            r#"{"type":"gesture","gesture":"B"}"#.to_string(),
        ]
    );
    assert_eq!(announcer.spoken(), vec!["V", "B"]);
    assert_eq!(
        peer.drain_events(),
        vec![
            SessionEvent::LocalGesture(Symbol::V),
            SessionEvent::LocalGesture(Symbol::B),
        ]
    );
}

#[tokio::test]
async fn sending_fails_until_channel_opens_and_after_it_closes() {
    let store = Arc::new(InMemoryStore::with_ids(["abc123"]));
    let mut host = Peer::new(SessionConfig::default(), store);
    host.session.start_as_initiator().await.unwrap();

    assert!(host.session.send_chat("too early").await.is_err());
    // жест распознаётся и без канала, просто не отправляется
    let v = vec![hand([true, true, false, false])];
    assert_eq!(host.session.on_hand_frames(&v).await, Some(Symbol::V));

    let channel = host.transport.channel().unwrap();
    assert!(channel.sent().is_empty());

    channel.push(ChannelEvent::Open);
    host.step_until(|s| s.messages().is_open()).await;
    host.session.send_chat("now").await.unwrap();

    channel.push(ChannelEvent::Close);
    host.step_until(|s| !s.messages().is_open()).await;
    assert!(host.session.send_chat("gone").await.is_err());
    assert!(host.drain_events().contains(&SessionEvent::Disconnected));
    assert_eq!(channel.sent(), vec![r#"{"type":"chat","text":"now"}"#.to_string()]);
}

#[tokio::test]
async fn spawned_session_takes_commands() {
    let (peer, channel) = connected(None).await;
    let Peer {
        session,
        transport,
        mut events,
    } = peer;

    let (handle, task) = session.spawn();
    assert!(handle.send_chat("over the handle"));
    assert!(handle.send_caption("caption"));
    assert!(handle.hangup());
    task.await.unwrap();

    assert_eq!(
        channel.sent(),
        vec![
            r#"{"type":"chat","text":"over the handle"}"#.to_string(),
            r#"{"type":"caption","text":"caption"}"#.to_string(),
        ]
    );
    assert!(transport.is_closed());
    assert!(channel.is_closed());

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen,
        vec![
            SessionEvent::StateChanged(SessionState::Closed),
            SessionEvent::Disconnected,
        ]
    );
    assert!(!handle.send_chat("after hangup"));
}

#[tokio::test]
async fn dropping_every_handle_hangs_up() {
    let (peer, _channel) = connected(None).await;
    let transport = peer.transport.clone();

    let (handle, task) = peer.session.spawn();
    drop(handle);
    task.await.unwrap();
    assert!(transport.is_closed());
}
