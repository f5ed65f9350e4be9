//! JetStream consumer draining the work queue into the catalog.
//!
//! Runs as a named durable consumer with explicit acks. Messages are
//! acknowledged only after the storage call succeeds; anything that fails
//! to decrypt, decode or store stays on the stream and is redelivered.
//! Delivery is therefore at-least-once, which the idempotent storage
//! absorbs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::{self, consumer};
use futures::StreamExt;
use tracing::{debug, error};

use crate::crypto::CryptoMachine;
use crate::error::{ConfigError, ConfigResult, QueueError, QueueResult};
use crate::processor::nats::{connect_client, TlsOptions, ENCRYPTED_HEADER};
use crate::store::stats::ProcessStats;
use crate::store::storage::{FileStored, Storage};
use crate::types::ScannedFile;

/// Messages per pull fetch
const FETCH_BATCH: usize = 10;

/// Max wait per pull fetch
const FETCH_WAIT: Duration = Duration::from_secs(1);

/// Listener configuration with the stock defaults.
#[derive(Debug, Clone)]
pub struct NatsListenerOptions {
    pub url: String,
    pub stream: String,
    pub subject: String,
    /// Durable consumer name. Replicas sharing this name share delivery.
    pub consumer_name: String,
    /// Passphrase for AES-256-GCM, required
    pub encryption_key: String,
    pub tls: TlsOptions,
}

impl Default for NatsListenerOptions {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream: "HASHUP".to_string(),
            subject: "FILES".to_string(),
            consumer_name: "hashup-store-consumer".to_string(),
            encryption_key: String::new(),
            tls: TlsOptions::default(),
        }
    }
}

/// Consuming end of the pipeline. Owns its subscription and the storage
/// handle for the catalog.
pub struct NatsListener<S: Storage> {
    options: NatsListenerOptions,
    storage: S,
    stats: Arc<ProcessStats>,
    crypto: CryptoMachine,
}

impl<S: Storage> NatsListener<S> {
    pub fn new(
        options: NatsListenerOptions,
        storage: S,
        stats: Arc<ProcessStats>,
    ) -> ConfigResult<Self> {
        if options.encryption_key.is_empty() {
            return Err(ConfigError::MissingEncryptionKey);
        }
        let crypto = CryptoMachine::from_passphrase(&options.encryption_key);

        Ok(Self {
            options,
            storage,
            stats,
            crypto,
        })
    }

    /// Fetch and store messages until the shutdown flag is raised.
    ///
    /// The stream must already exist; unlike the producer, the consumer
    /// does not create it.
    pub async fn listen(&mut self, shutdown: &AtomicBool) -> QueueResult<()> {
        let client = connect_client(&self.options.url, &self.options.tls).await?;
        let jetstream = jetstream::new(client);

        let stream = jetstream
            .get_stream(&self.options.stream)
            .await
            .map_err(|e| QueueError::StreamSetupFailed {
                stream: self.options.stream.clone(),
                reason: e.to_string(),
            })?;

        let consumer = stream
            .get_or_create_consumer(
                &self.options.consumer_name,
                consumer::pull::Config {
                    durable_name: Some(self.options.consumer_name.clone()),
                    ack_policy: consumer::AckPolicy::Explicit,
                    deliver_policy: consumer::DeliverPolicy::All,
                    filter_subject: self.options.subject.clone(),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| QueueError::ConsumerSetupFailed {
                name: self.options.consumer_name.clone(),
                reason: e.to_string(),
            })?;

        debug!("listening for files on {}", self.options.subject);

        while !shutdown.load(Ordering::Relaxed) {
            let mut batch = match consumer
                .fetch()
                .max_messages(FETCH_BATCH)
                .expires(FETCH_WAIT)
                .messages()
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    error!("error fetching messages: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            while let Some(message) = batch.next().await {
                let message = match message {
                    Ok(message) => message,
                    Err(e) => {
                        error!("error fetching messages: {e}");
                        break;
                    }
                };

                self.stats.increment_received();

                let encrypted = message
                    .headers
                    .as_ref()
                    .and_then(|headers| headers.get(ENCRYPTED_HEADER))
                    .map(|value| value.as_str() == "true")
                    .unwrap_or(false);

                // Ack only after the record hit the catalog; skipped
                // messages stay on the stream for redelivery
                if self
                    .handle_payload(message.payload.as_ref(), encrypted)
                    .is_some()
                {
                    if let Err(e) = message.ack().await {
                        error!("failed to ack message: {e}");
                    }
                }
            }
        }

        Ok(())
    }

    /// Decrypt, decode and store one message body. Returns `None` when the
    /// message must not be acknowledged.
    fn handle_payload(&mut self, payload: &[u8], encrypted: bool) -> Option<FileStored> {
        let plaintext = if encrypted {
            match self.crypto.decrypt(payload) {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    error!("failed to decrypt message: {e}");
                    self.stats.increment_skipped();
                    return None;
                }
            }
        } else {
            payload.to_vec()
        };

        let file = match ScannedFile::from_msgpack(&plaintext) {
            Ok(file) => file,
            Err(e) => {
                error!("failed to decode message: {e}");
                self.stats.increment_skipped();
                return None;
            }
        };

        debug!(
            "[{}] received file: {} (size: {}, hash: {})",
            file.hostname, file.path, file.size, file.hash
        );

        self.stats.record_host(&file.hostname);
        self.stats.record_extension(&file.extension);

        match self.storage.store(&file) {
            Ok(stored) => {
                if stored.dirty() {
                    self.stats.increment_written();
                } else {
                    self.stats.increment_already_present();
                }
                Some(stored)
            }
            Err(e) => {
                error!("failed to save file to database: {e}");
                self.stats.increment_skipped();
                None
            }
        }
    }
}
