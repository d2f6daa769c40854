//! Gateway relay: transport, stream decoding, and the chat client
//!
//! Layered leaf-first: `transport` performs single HTTP requests, `sse`
//! decodes streaming bodies, `client` drives a whole turn with retry and
//! route recovery. `instances`, `health` and `conversations` are the small
//! non-streaming gateway APIs.

pub mod client;
pub mod conversations;
pub mod health;
pub mod instances;
pub mod sse;
pub mod transport;

pub use client::{RelayCommand, RelayConfig, RelayEvent, RelayHandle, RelayRunner};
pub use health::HealthReport;
pub use instances::Instance;
pub use sse::{SseDecoder, StreamEvent};
pub use transport::Transport;
