//! A lock-step TFTP (RFC 1350, octet mode) client and server. The transfer
//! session engine (wire codec, transport, sender/receiver loops) is shared
//! symmetrically by both roles; everything else — configuration, the server
//! dispatcher and TUI, the client driver and REPL — is built around it.

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod repl;
pub mod server;
pub mod transport;
pub mod wire;
