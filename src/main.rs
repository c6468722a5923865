//! Loopback-демо: хозяин и гость договариваются через хранилище в памяти
//! внутри одного процесса, обмениваются сообщением и субтитром и завершают звонок.

use std::sync::Arc;
use std::time::Duration;
use symphony_lib::{
    init_logging, Emitter, Error, InMemoryStore, RendezvousStore, Result, Session, SessionConfig,
    SessionEvent, WebRtcTransport,
};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::info;

const WAIT: Duration = Duration::from_secs(20);

async fn new_session(
    config: &SessionConfig,
    store: Arc<dyn RendezvousStore>,
) -> Result<(Session, UnboundedReceiver<SessionEvent>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let (transport, transport_events) = WebRtcTransport::new(config).await?;
    let session = Session::new(
        config.clone(),
        store,
        transport,
        transport_events,
        Emitter::new(tx),
    );
    Ok((session, rx))
}

/// Печатает события, пока не придёт подходящее
async fn wait_for(
    who: &str,
    events: &mut UnboundedReceiver<SessionEvent>,
    wanted: impl Fn(&SessionEvent) -> bool,
) -> Result<SessionEvent> {
    let waiting = async {
        while let Some(event) = events.recv().await {
            println!(
                "[{}] {:<5} {:?}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                who,
                event
            );
            if let SessionEvent::Failed(reason) = &event {
                return Err(Error::ConnectionLost(reason.clone()));
            }
            if wanted(&event) {
                return Ok(event);
            }
        }
        Err(Error::InvalidState(format!("{} session ended", who)))
    };

    tokio::time::timeout(WAIT, waiting)
        .await
        .map_err(|_| Error::NegotiationTimeout(WAIT.as_secs()))?
}

#[tokio::main]
async fn main() -> Result<()> {
    // без STUN: обе стороны в одном процессе, хватает host-кандидатов
    let config = SessionConfig {
        ice_servers: Vec::new(),
        ..SessionConfig::default()
    };
    config.validate()?;
    init_logging(&config.log);

    let store: Arc<dyn RendezvousStore> = Arc::new(InMemoryStore::new());

    let (mut host, mut host_events) = new_session(&config, store.clone()).await?;
    let code = host.start_as_initiator().await?;
    info!("Join code: {}", code);

    let (mut guest, mut guest_events) = new_session(&config, store).await?;
    guest.start_as_responder(&code).await?;

    let (host_handle, host_task) = host.spawn();
    let (guest_handle, guest_task) = guest.spawn();

    wait_for("host", &mut host_events, |e| *e == SessionEvent::ChannelOpen).await?;
    wait_for("guest", &mut guest_events, |e| *e == SessionEvent::ChannelOpen).await?;

    host_handle.send_chat("hello from the host");
    wait_for("guest", &mut guest_events, |e| matches!(e, SessionEvent::Chat(_))).await?;

    guest_handle.send_caption("nice to see you");
    wait_for("host", &mut host_events, |e| matches!(e, SessionEvent::Caption(_))).await?;

    host_handle.hangup();
    guest_handle.hangup();
    let _ = host_task.await;
    let _ = guest_task.await;
    info!("Call finished");
    Ok(())
}
