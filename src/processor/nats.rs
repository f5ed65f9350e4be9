//! JetStream publishing processor.
//!
//! Serializes records to MessagePack, optionally seals them with
//! AES-256-GCM, and publishes them onto a durable work-queue stream. The
//! stream is created on first use; messages are removed on consumer ack and
//! expire after 30 days otherwise.

use std::path::PathBuf;
use std::time::Duration;

use async_nats::jetstream::{self, stream};
use async_trait::async_trait;
use tracing::debug;

use crate::crypto::CryptoMachine;
use crate::error::{QueueError, QueueResult};
use crate::processor::Processor;
use crate::types::ScannedFile;

/// Broker connection dial timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long unconsumed messages survive on the stream
const MAX_MESSAGE_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Header marking an encrypted message body
pub const ENCRYPTED_HEADER: &str = "Encrypted";

/// Mutual TLS material. TLS is enabled only when all three paths are set;
/// otherwise the connection is plain TCP to a co-located broker.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub ca_cert: Option<PathBuf>,
}

impl TlsOptions {
    fn enabled(&self) -> Option<(&PathBuf, &PathBuf, &PathBuf)> {
        match (&self.client_cert, &self.client_key, &self.ca_cert) {
            (Some(cert), Some(key), Some(ca)) => Some((cert, key, ca)),
            _ => None,
        }
    }
}

/// Processor configuration with the stock defaults.
#[derive(Debug, Clone)]
pub struct NatsProcessorOptions {
    pub url: String,
    pub stream: String,
    pub subject: String,
    /// Passphrase for AES-256-GCM; `None` publishes plaintext bodies
    pub encryption_key: Option<String>,
    pub tls: TlsOptions,
}

impl Default for NatsProcessorOptions {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream: "HASHUP".to_string(),
            subject: "FILES".to_string(),
            encryption_key: None,
            tls: TlsOptions::default(),
        }
    }
}

/// Connect to the broker, applying mutual TLS when configured.
pub(crate) async fn connect_client(
    url: &str,
    tls: &TlsOptions,
) -> QueueResult<async_nats::Client> {
    let mut options =
        async_nats::ConnectOptions::new().connection_timeout(CONNECT_TIMEOUT);

    if let Some((cert, key, ca)) = tls.enabled() {
        debug!("enabling mutual TLS");
        options = options
            .require_tls(true)
            .add_client_certificate(cert.clone(), key.clone())
            .add_root_certificates(ca.clone());
    }

    options
        .connect(url)
        .await
        .map_err(|e| QueueError::ConnectFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })
}

/// Publishing end of the pipeline. Owns the broker connection and the
/// encryption machine; safe to share across workers.
pub struct NatsProcessor {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    subject: String,
    crypto: Option<CryptoMachine>,
}

impl NatsProcessor {
    /// Connect and make sure the work-queue stream exists.
    ///
    /// The stream is file-backed, work-queue retention (ack removes the
    /// message), discards oldest on overflow, single replica, 30-day TTL.
    /// Any stream lookup failure other than "does not exist" fails startup.
    pub async fn connect(options: NatsProcessorOptions) -> QueueResult<Self> {
        let client = connect_client(&options.url, &options.tls).await?;
        let jetstream = jetstream::new(client.clone());

        jetstream
            .get_or_create_stream(stream::Config {
                name: options.stream.clone(),
                subjects: vec![options.subject.clone()],
                storage: stream::StorageType::File,
                retention: stream::RetentionPolicy::WorkQueue,
                discard: stream::DiscardPolicy::Old,
                max_age: MAX_MESSAGE_AGE,
                num_replicas: 1,
                ..Default::default()
            })
            .await
            .map_err(|e| QueueError::StreamSetupFailed {
                stream: options.stream.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            jetstream,
            subject: options.subject,
            crypto: options
                .encryption_key
                .as_deref()
                .map(CryptoMachine::from_passphrase),
        })
    }

    /// Flush the broker connection. The caller saves the cache separately.
    pub async fn close(&self) -> QueueResult<()> {
        self.client
            .flush()
            .await
            .map_err(|e| QueueError::PublishFailed(e.to_string()))
    }
}

#[async_trait]
impl Processor for NatsProcessor {
    async fn process(&self, file: ScannedFile) -> QueueResult<()> {
        let plain = file
            .to_msgpack()
            .map_err(|e| QueueError::Serialize(e.to_string()))?;

        let (payload, encrypted) = match &self.crypto {
            Some(crypto) => {
                let sealed = crypto
                    .encrypt(&plain)
                    .map_err(|e| QueueError::Serialize(e.to_string()))?;
                debug!(
                    "message encrypted: {} bytes -> {} bytes",
                    plain.len(),
                    sealed.len()
                );
                (sealed, true)
            }
            None => (plain, false),
        };

        let ack = if encrypted {
            let mut headers = async_nats::HeaderMap::new();
            headers.insert(ENCRYPTED_HEADER, "true");
            self.jetstream
                .publish_with_headers(self.subject.clone(), headers, payload.into())
                .await
        } else {
            self.jetstream
                .publish(self.subject.clone(), payload.into())
                .await
        }
        .map_err(|e| QueueError::PublishFailed(e.to_string()))?;

        // Wait for the broker to accept the message; only then is the
        // record durably enqueued and safe to cache.
        ack.await
            .map_err(|e| QueueError::PublishFailed(e.to_string()))?;

        Ok(())
    }
}
