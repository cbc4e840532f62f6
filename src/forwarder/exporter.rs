// SPDX-License-Identifier: Apache-2.0

use super::buffer::{Batch, SharedBuffer, lock_buffer};
use super::client::{ConnectError, HttpClient, build_hyper_client};
use super::config::{Auth, ForwarderConfig, PayloadFormat};
use super::retry::Backoff;
use super::tls::TlsConfig;
use super::{Error, Result};
use crate::bounded_channel::{BoundedReceiver, BoundedSender};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use http::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE, USER_AGENT};
use http::{HeaderValue, Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use std::io::Write;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, error, info, warn};

// Longest response body excerpt carried in a failure reason
const MAX_REASON_BODY: usize = 256;

/// Result of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Ack,
    Retryable(String),
    Fatal(String),
}

/// Delivery progress reported back to the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwarderEvent {
    Delivered { records: usize, bytes: usize },
    Retrying { reason: String, attempt: u32 },
    Halted { reason: String },
}

/// Map a collector response status to a delivery outcome.
pub fn classify_status(status: StatusCode, detail: &str) -> SendOutcome {
    let reason = if detail.is_empty() {
        format!("collector responded {}", status)
    } else {
        format!("collector responded {}: {}", status, detail)
    };

    match status.as_u16() {
        200..=299 => SendOutcome::Ack,
        408 | 429 => SendOutcome::Retryable(reason),
        500..=599 => SendOutcome::Retryable(reason),
        401 | 403 => SendOutcome::Fatal(format!("authentication rejected, {}", reason)),
        _ => SendOutcome::Fatal(reason),
    }
}

/// Serialize already-encoded JSON records as one request body.
pub fn encode_payload(records: &[Bytes], format: PayloadFormat) -> Vec<u8> {
    let size: usize = records.iter().map(|r| r.len() + 1).sum();
    let mut out = Vec::with_capacity(size + 2);
    match format {
        PayloadFormat::JsonArray => {
            out.push(b'[');
            for (i, record) in records.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.extend_from_slice(record);
            }
            out.push(b']');
        }
        PayloadFormat::Ndjson => {
            for record in records {
                out.extend_from_slice(record);
                out.push(b'\n');
            }
        }
    }
    out
}

/// Drains the shared [`RecordBuffer`](super::RecordBuffer) to the collector.
pub struct Forwarder {
    config: ForwarderConfig,
    client: HttpClient,
    uri: Uri,
    auth_header: Option<HeaderValue>,
    buffer: SharedBuffer,
    events: Option<BoundedSender<ForwarderEvent>>,
    halted: Option<String>,
}

impl Forwarder {
    pub fn new(config: ForwarderConfig, buffer: SharedBuffer) -> Result<Self> {
        config.validate().map_err(Error::Config)?;

        let uri = config
            .url()
            .parse::<Uri>()
            .map_err(|e| Error::Config(e.to_string()))?;
        let auth_header = auth_header(&config.auth)?;

        let mut tls = TlsConfig::builder().with_skip_verify(config.tls.skip_verify);
        if let Some(ca_file) = &config.tls.ca_file {
            tls = tls.with_ca_file(ca_file.clone());
        }
        let tls = tls.build().map_err(|e| Error::Tls(e.to_string()))?;
        let client = build_hyper_client(tls).map_err(|e| Error::Tls(e.to_string()))?;

        Ok(Self {
            config,
            client,
            uri,
            auth_header,
            buffer,
            events: None,
            halted: None,
        })
    }

    /// Report delivery progress on `events`. Events are dropped when the channel is full.
    pub fn with_events(mut self, events: BoundedSender<ForwarderEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Reason forwarding was halted, if a fatal response was received
    pub fn halted(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    pub fn encode(&self, batch: &Batch) -> Result<Bytes> {
        let payload = encode_payload(&batch.records, self.config.format);
        if !self.config.compression {
            return Ok(Bytes::from(payload));
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload)?;
        Ok(Bytes::from(encoder.finish()?))
    }

    fn build_request(&self, body: Bytes) -> std::result::Result<Request<Full<Bytes>>, BoxError> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(self.uri.clone())
            .header(CONTENT_TYPE, self.config.format.content_type())
            .header(
                USER_AGENT,
                concat!("tailship/", env!("CARGO_PKG_VERSION")),
            );
        if self.config.compression {
            builder = builder.header(CONTENT_ENCODING, "gzip");
        }
        if let Some(auth) = &self.auth_header {
            builder = builder.header(AUTHORIZATION, auth.clone());
        }
        Ok(builder.body(Full::new(body))?)
    }

    /// Attempt delivery of one batch. The buffer is not modified.
    pub async fn send(&self, batch: &Batch) -> SendOutcome {
        let body = match self.encode(batch) {
            Ok(body) => body,
            Err(e) => return SendOutcome::Fatal(e.to_string()),
        };
        let request = match self.build_request(body) {
            Ok(request) => request,
            Err(e) => return SendOutcome::Fatal(format!("failed to build request: {}", e)),
        };

        let exchange = async {
            let response = match self.client.request(request).await {
                Ok(response) => response,
                Err(e) if e.is_connect() => return Err(format!("{}: {}", ConnectError, e)),
                Err(e) => return Err(format!("request failed: {}", e)),
            };
            let status = response.status();
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| format!("failed to read response: {}", e))?
                .to_bytes();
            Ok((status, body))
        };

        match tokio::time::timeout(self.config.request_timeout, exchange).await {
            Err(_) => SendOutcome::Retryable(format!(
                "request timed out after {:?}",
                self.config.request_timeout
            )),
            Ok(Err(reason)) => SendOutcome::Retryable(reason),
            Ok(Ok((status, body))) => {
                let end = body.len().min(MAX_REASON_BODY);
                let detail = String::from_utf8_lossy(&body[..end]);
                classify_status(status, detail.trim())
            }
        }
    }

    /// Send batches until the buffer is empty, forwarding halts or `cancel`
    /// fires. Returns the number of records acknowledged.
    pub async fn flush(&mut self, cancel: &CancellationToken) -> usize {
        let mut backoff = Backoff::new(self.config.retry.clone());
        let mut delivered = 0;

        while self.halted.is_none() && !cancel.is_cancelled() {
            let batch = lock_buffer(&self.buffer)
                .peek_batch(self.config.max_batch_records, self.config.max_batch_bytes);
            let Some(batch) = batch else {
                break;
            };

            match self.send(&batch).await {
                SendOutcome::Ack => {
                    lock_buffer(&self.buffer).ack(&batch);
                    delivered += batch.len();
                    backoff.reset();
                    debug!(records = batch.len(), bytes = batch.bytes, "Delivered batch");
                    self.emit(ForwarderEvent::Delivered {
                        records: batch.len(),
                        bytes: batch.bytes,
                    });
                }
                SendOutcome::Retryable(reason) => {
                    let delay = backoff.next_delay();
                    warn!(
                        attempt = backoff.attempts(),
                        delay = ?delay,
                        reason = reason.as_str(),
                        "Forwarding failed, will retry again after delay."
                    );
                    self.emit(ForwarderEvent::Retrying {
                        reason,
                        attempt: backoff.attempts(),
                    });
                    select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                SendOutcome::Fatal(reason) => {
                    error!(
                        reason = reason.as_str(),
                        "Collector rejected batch, forwarding halted until restart"
                    );
                    self.emit(ForwarderEvent::Halted {
                        reason: reason.clone(),
                    });
                    self.halted = Some(reason);
                }
            }
        }

        delivered
    }

    /// Flush on every interval tick and on every nudge from the coordinator.
    ///
    /// After `cancel` fires the loop waits for the coordinator to close the nudge
    /// channel, so records it buffered while stopping are included in the final
    /// flush, then flushes once more within `shutdown_flush_timeout`.
    pub async fn run(
        mut self,
        mut nudges: BoundedReceiver<()>,
        cancel: CancellationToken,
    ) -> std::result::Result<(), BoxError> {
        let mut interval = tokio::time::interval(self.config.flush_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut coordinator_done = false;

        loop {
            select! {
                biased;

                _ = cancel.cancelled() => break,
                nudge = nudges.next() => {
                    if nudge.is_none() {
                        coordinator_done = true;
                        break;
                    }
                }
                _ = interval.tick() => {}
            }

            self.flush(&cancel).await;
        }

        let deadline = self.config.shutdown_flush_timeout;
        if !coordinator_done {
            let closed = async { while nudges.next().await.is_some() {} };
            if tokio::time::timeout(deadline, closed).await.is_err() {
                warn!("Coordinator did not stop in time, flushing what is buffered");
            }
        }

        // The run token is already cancelled; the final flush is bounded by time instead
        let final_cancel = CancellationToken::new();
        let delivered = match tokio::time::timeout(deadline, self.flush(&final_cancel)).await {
            Ok(delivered) => delivered,
            Err(_) => {
                final_cancel.cancel();
                0
            }
        };

        let remaining = lock_buffer(&self.buffer).len();
        if remaining > 0 {
            warn!(
                delivered,
                remaining, "Shutdown flush incomplete, buffered records were not delivered"
            );
        } else {
            info!(delivered, "Shutdown flush complete");
        }
        Ok(())
    }

    fn emit(&self, event: ForwarderEvent) {
        if let Some(events) = &self.events {
            let _ = events.try_send(event);
        }
    }
}

fn auth_header(auth: &Auth) -> Result<Option<HeaderValue>> {
    let value = match auth {
        Auth::None => return Ok(None),
        Auth::Basic { username, password } => {
            format!("Basic {}", STANDARD.encode(format!("{}:{}", username, password)))
        }
        Auth::Bearer(token) => format!("Bearer {}", token),
    };
    let mut header = HeaderValue::from_str(&value)
        .map_err(|_| Error::Config("credentials contain invalid header characters".to_string()))?;
    header.set_sensitive(true);
    Ok(Some(header))
}
