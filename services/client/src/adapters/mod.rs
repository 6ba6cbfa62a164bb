//! services/client/src/adapters/mod.rs
//!
//! Concrete implementations of the `mcq_core` ports: the HTTP generation
//! API, the websocket realtime transport, disk persistence for progress
//! snapshots, and token material for authenticated calls.

pub mod http;
pub mod snapshot;
pub mod token;
pub mod ws;

pub use http::HttpGenerationApi;
pub use snapshot::FileSnapshotStore;
pub use token::StaticTokenProvider;
pub use ws::WsTransport;
