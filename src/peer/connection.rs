use crate::config::SessionConfig;
use crate::logger::dump_candidate;
use crate::peer::data_channel::WebRtcChannel;
use crate::peer::transport::{ChannelHandle, Transport, TransportEvent};
use crate::peer::types::{
    CandidatePayload, ConnectionState, DescriptionKind, ServerConfig, SessionDescription,
};
use crate::utils::add_ice_url_scheme;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::{
    api::APIBuilder,
    data_channel::{data_channel_init::RTCDataChannelInit, RTCDataChannel},
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

/// Peer connection на webrtc-rs, реализующий `Transport`
pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
}

impl WebRtcTransport {
    /// создаём Peer; события колбэков уходят в возвращаемый канал
    pub async fn new(
        config: &SessionConfig,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>)> {
        let api = APIBuilder::new().build();
        let pc = Arc::new(api.new_peer_connection(rtc_config(config)).await?);
        let (tx, rx) = mpsc::unbounded_channel();

        // Обработчик для сбора локальных кандидатов
        pc.on_ice_candidate(Box::new({
            let tx = tx.clone();
            move |cand: Option<RTCIceCandidate>| {
                let tx = tx.clone();
                Box::pin(async move {
                    match cand {
                        Some(c) => {
                            dump_candidate("LOCAL", &c);
                            if let Ok(init) = c.to_json() {
                                let _ = tx.send(TransportEvent::LocalCandidate(CandidatePayload {
                                    candidate: init.candidate,
                                    sdp_mid: init.sdp_mid,
                                    sdp_mline_index: init.sdp_mline_index,
                                }));
                            }
                        }
                        None => {
                            // cand == None означает конец сбора
                            debug!("ICE candidate gathering completed (null candidate received)");
                            let _ = tx.send(TransportEvent::GatheringComplete);
                        }
                    }
                })
            }
        }));

        pc.on_ice_gathering_state_change(Box::new(move |state| {
            debug!("ICE gathering state changed to: {:?}", state);
            Box::pin(async {})
        }));

        pc.on_peer_connection_state_change(Box::new({
            let tx = tx.clone();
            move |st: RTCPeerConnectionState| {
                info!("Peer connection state changed to: {:?}", st);
                if let Some(state) = map_state(st) {
                    let _ = tx.send(TransportEvent::ConnectionStateChanged(state));
                }
                Box::pin(async {})
            }
        }));

        pc.on_data_channel(Box::new({
            let tx = tx.clone();
            move |dc: Arc<RTCDataChannel>| {
                let channel: Arc<dyn ChannelHandle> = WebRtcChannel::wrap(dc);
                let _ = tx.send(TransportEvent::IncomingChannel(channel));
                Box::pin(async {})
            }
        }));

        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            info!("Remote track added: kind={}", track.kind());
            let _ = tx.send(TransportEvent::RemoteTrackAdded {
                track_id: track.id(),
                kind: track.kind().to_string(),
            });
            Box::pin(async {})
        }));

        Ok((Arc::new(Self { pc }), rx))
    }

    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn create_local_description(&self, kind: DescriptionKind) -> Result<SessionDescription> {
        let sdp = match kind {
            DescriptionKind::Offer => self.pc.create_offer(None).await,
            DescriptionKind::Answer => self.pc.create_answer(None).await,
        }
        .map_err(|e| Error::TransportRejection(format!("creating {}: {}", kind, e)))?;

        Ok(SessionDescription {
            kind,
            body: sdp.sdp,
        })
    }

    async fn apply_local_description(&self, description: &SessionDescription) -> Result<()> {
        let sdp = to_rtc(description)?;
        self.pc.set_local_description(sdp).await.map_err(|e| {
            Error::TransportRejection(format!("local {}: {}", description.kind, e))
        })
    }

    async fn apply_remote_description(&self, description: &SessionDescription) -> Result<()> {
        let sdp = to_rtc(description)?;
        self.pc.set_remote_description(sdp).await.map_err(|e| {
            Error::TransportRejection(format!("remote {}: {}", description.kind, e))
        })
    }

    async fn add_candidate(&self, candidate: &CandidatePayload) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::CandidateRejected(e.to_string()))
    }

    async fn create_channel(&self, label: &str) -> Result<Arc<dyn ChannelHandle>> {
        let dc = self
            .pc
            .create_data_channel(label, Some(RTCDataChannelInit::default()))
            .await
            .map_err(|e| Error::TransportRejection(format!("data channel '{}': {}", label, e)))?;
        Ok(WebRtcChannel::wrap(dc))
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}

fn to_rtc(description: &SessionDescription) -> Result<RTCSessionDescription> {
    let body = description.body.clone();
    match description.kind {
        DescriptionKind::Offer => RTCSessionDescription::offer(body),
        DescriptionKind::Answer => RTCSessionDescription::answer(body),
    }
    .map_err(|e| Error::TransportRejection(format!("malformed {}: {}", description.kind, e)))
}

fn map_state(st: RTCPeerConnectionState) -> Option<ConnectionState> {
    match st {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        _ => None,
    }
}

/// Создает конфигурацию для peer connection
fn rtc_config(config: &SessionConfig) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: get_user_ice_servers(&config.ice_servers),
        ice_candidate_pool_size: config.ice_candidate_pool_size,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

/// Конфигурация серверов в формате webrtc-rs
pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}
