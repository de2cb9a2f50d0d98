//! parley-api: client side of the chat backend
//!
//! Wire types, the error taxonomy, the line-oriented stream decoder, and the
//! [`SessionApi`] / [`CompletionApi`] traits together with their `reqwest`
//! implementation.

pub mod client;
pub mod error;
pub mod stream;
pub mod types;

pub use client::{
    ByteStream, CompletionApi, CompletionReply, HttpBackend, HttpBackendConfig, SessionApi,
};
pub use error::{Error, Result};
pub use stream::{WireDecoder, WireEvent};
pub use types::*;
