pub mod connection;
pub mod data_channel;
pub mod ice;
pub mod transport;
pub mod types;

pub use ice::CandidateQueue;
pub use transport::{ChannelEvent, ChannelHandle, Transport, TransportEvent};
pub use types::{Candidate, CandidatePayload, ConnectionState, Role, ServerConfig, SessionDescription};
