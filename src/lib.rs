pub mod config;
pub mod error;
pub mod gesture;
pub mod logger;
pub mod peer;
pub mod protocol;
pub mod session;
pub mod signaling;
pub mod utils;

pub use config::SessionConfig;
pub use error::{Error, Result};
pub use gesture::{classify, GestureDebouncer, LandmarkFrame, Point, Symbol};
pub use logger::{init_logging, Emitter, SessionEvent};
pub use peer::connection::WebRtcTransport;
pub use protocol::{Envelope, EnvelopeKind, MessageChannel};
pub use session::{Session, SessionCommand, SessionHandle, SessionState};
pub use signaling::{InMemoryStore, RendezvousStore};
