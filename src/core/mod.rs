//! The session fleet core: session identity, the connection state machine,
//! and the stores/coordinators it depends on. Everything under `core/` is
//! transport-agnostic — `web/` and `db/` are the only modules that know
//! about HTTP or SQL.

pub mod classification;
pub mod connection_factory;
pub mod controller;
pub mod credential_store;
pub mod crypto;
pub mod errors;
pub mod fleet;
pub mod handover;
pub mod model;
pub mod pairing;
pub mod session_id;
pub mod session_store;

pub use connection_factory::{ConnectionFactory, ProtocolSocket, SocketConfig};
pub use controller::{ControllerHandle, SessionController};
pub use credential_store::{CredentialBacking, CredentialStore};
pub use crypto::CredentialCipher;
pub use fleet::{FleetLimits, FleetManager, FleetStats};
pub use handover::WebHandoverCoordinator;
pub use model::{ConnectionStatus, Session, SessionPatch};
pub use pairing::PairingCoordinator;
pub use session_id::{Source, SessionId};
pub use session_store::{SessionBacking, SessionStore};
