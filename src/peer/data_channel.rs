use crate::peer::transport::{ChannelEvent, ChannelHandle};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

/// Data channel поверх webrtc-rs; колбэки превращаются в `ChannelEvent`
pub struct WebRtcChannel {
    dc: Arc<RTCDataChannel>,
    events: Mutex<Option<mpsc::UnboundedReceiver<ChannelEvent>>>,
}

impl WebRtcChannel {
    /// общий обработчик data-channel
    pub fn wrap(dc: Arc<RTCDataChannel>) -> Arc<Self> {
        debug!("Wrapping data channel '{}'", dc.label());
        let (tx, rx) = mpsc::unbounded_channel();

        dc.on_open(Box::new({
            let tx = tx.clone();
            move || {
                info!("Data channel opened");
                let _ = tx.send(ChannelEvent::Open);
                Box::pin(async {})
            }
        }));

        dc.on_message(Box::new({
            let tx = tx.clone();
            move |msg: DataChannelMessage| {
                debug!("Received message, length: {}", msg.data.len());
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => {
                        let _ = tx.send(ChannelEvent::Message(text));
                    }
                    Err(_) => warn!("Dropping non UTF-8 data channel message"),
                }
                Box::pin(async {})
            }
        }));

        dc.on_close(Box::new(move || {
            info!("Data channel closed");
            let _ = tx.send(ChannelEvent::Close);
            Box::pin(async {})
        }));

        Arc::new(Self {
            dc,
            events: Mutex::new(Some(rx)),
        })
    }
}

#[async_trait]
impl ChannelHandle for WebRtcChannel {
    fn label(&self) -> String {
        self.dc.label().to_string()
    }

    async fn send_text(&self, text: String) -> Result<()> {
        self.dc
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|e| Error::DataChannelError(format!("Failed to send message: {}", e)))
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ChannelEvent>> {
        self.events.lock().ok()?.take()
    }

    async fn close(&self) -> Result<()> {
        self.dc
            .close()
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to close channel: {}", e)))
    }
}
