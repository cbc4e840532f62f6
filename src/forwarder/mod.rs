// SPDX-License-Identifier: Apache-2.0

//! Batching HTTP(S) delivery of enriched records to the remote collector.
//!
//! Records wait in a bounded [`RecordBuffer`] until a batch containing them is
//! acknowledged. A fatal response halts delivery until restart while the buffer
//! keeps accepting records, dropping the oldest once full.

mod buffer;
mod client;
mod config;
mod exporter;
mod retry;
mod tls;

pub use buffer::{Batch, RecordBuffer, SharedBuffer, lock_buffer};
pub use client::ConnectError;
pub use config::{
    Auth, ForwarderConfig, PayloadFormat, RetryConfig, STREAM_PLACEHOLDER, TlsSettings,
};
pub use exporter::{Forwarder, ForwarderEvent, SendOutcome, classify_status, encode_payload};
pub use retry::Backoff;
pub use tls::{TlsConfig, TlsConfigBuilder};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid forwarder configuration: {0}")]
    Config(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
