// Local crates
use crate::{
    helpers::load_config::SegmentConfig,
    sink::models::{Batch, SinkError},
};

// External crates
use reqwest::Client;
use std::future::Future;
use std::time::Duration;
use tracing::instrument;

/// Delivers one batch request to the analytics collector.
pub trait BatchTransport {
    fn send_batch(&self, batch: &Batch) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// Segment HTTP batch API transport.
#[derive(Debug, Clone)]
pub struct HttpBatchTransport {
    http: Client,
    batch_url: String,
    write_key: String,
}

impl HttpBatchTransport {
    pub fn new(config: &SegmentConfig) -> Result<Self, SinkError> {
        let http = Client::builder()
            .user_agent(concat!("thorax/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            batch_url: format!("{}/v1/batch", config.endpoint.trim_end_matches('/')),
            write_key: config.write_key.clone(),
        })
    }
}

impl BatchTransport for HttpBatchTransport {
    #[instrument(
        name = "thorax_sink::send_batch",
        target = "sink::transport::HttpBatchTransport",
        skip_all,
        level = "debug"
    )]
    async fn send_batch(&self, batch: &Batch) -> Result<(), SinkError> {
        tracing::debug!(
            batch_url = %self.batch_url,
            messages = batch.batch.len(),
            "Sending analytics batch"
        );

        // Segment authenticates with the write key as the basic auth user
        let response = self
            .http
            .post(&self.batch_url)
            .basic_auth(&self.write_key, Some(""))
            .json(batch)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(SinkError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
