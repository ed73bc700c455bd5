//! Client-side sync engine: player adapters, reconciliation, autoplay and DJ decks.

pub mod adapter;
pub mod autoplay;
pub mod dj;
pub mod guard;
pub mod headless;
pub mod reconcile;
pub mod session;
pub mod soundcloud;
pub mod spotify;
pub mod transport;
pub mod youtube;

pub use adapter::{create_adapter, AdapterEvent, EmbedFactory, PlayerAdapter, PlayerPhase};
pub use session::{Notice, RoomSession};
pub use transport::{ChannelTransport, LocalTransport, Transport, WsTransport};
