//! Journal client - the only component that talks to the Bugout Spire API.
//!
//! The sync loop and the cursor store only see the [`JournalClient`] trait, so
//! tests run against an in-memory journal and the HTTP details stay here.

// Local crates
use crate::{
    helpers::load_config::JournalConfig,
    journal::models::{EntryResultsPage, JournalEntry, NewEntry, SearchRequest},
};

// External crates
use reqwest::{Client, Response};
use std::future::Future;
use std::time::Duration;
use tracing::instrument;

/// Journal client error handling
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("journal request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("journal responded with status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Search and entry creation against a single journal.
pub trait JournalClient {
    /// Fetch one page of entries matching `request`.
    fn search(
        &self,
        request: &SearchRequest,
    ) -> impl Future<Output = Result<EntryResultsPage, JournalError>> + Send;

    /// Create a new entry, returning the stored entry.
    fn create_entry(
        &self,
        entry: &NewEntry,
    ) -> impl Future<Output = Result<JournalEntry, JournalError>> + Send;
}

/// HTTP client for the Bugout Spire journals API.
#[derive(Debug, Clone)]
pub struct BugoutJournalClient {
    http: Client,
    spire_url: String,
    token: String,
    journal_id: String,
}

impl BugoutJournalClient {
    /// Build a client for the journal named in `config`.
    pub fn new(config: &JournalConfig) -> Result<Self, JournalError> {
        let http = Client::builder()
            .user_agent(concat!("thorax/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            spire_url: config.spire_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            journal_id: config.journal_id.clone(),
        })
    }

    fn journal_url(&self, path: &str) -> String {
        format!("{}/journals/{}/{}", self.spire_url, self.journal_id, path)
    }
}

impl JournalClient for BugoutJournalClient {
    #[instrument(
        name = "thorax_journal::search",
        target = "journal::client::BugoutJournalClient",
        skip_all,
        level = "debug"
    )]
    async fn search(&self, request: &SearchRequest) -> Result<EntryResultsPage, JournalError> {
        tracing::debug!(
            journal_id = %self.journal_id,
            query = %request.query,
            limit = request.limit,
            offset = request.offset,
            order = request.order.as_str(),
            "Searching journal entries"
        );

        let params = [
            ("q", request.query.clone()),
            ("limit", request.limit.to_string()),
            ("offset", request.offset.to_string()),
            ("order", request.order.as_str().to_string()),
            ("content", request.include_content.to_string()),
        ];
        let response = self
            .http
            .get(self.journal_url("search"))
            .bearer_auth(&self.token)
            .query(&params)
            .send()
            .await?;

        let page: EntryResultsPage = ensure_success(response).await?.json().await?;
        tracing::debug!(
            returned = page.results.len(),
            total_results = page.total_results,
            next_offset = page.next_offset,
            "Journal search page received"
        );
        Ok(page)
    }

    #[instrument(
        name = "thorax_journal::create_entry",
        target = "journal::client::BugoutJournalClient",
        skip_all,
        level = "debug"
    )]
    async fn create_entry(&self, entry: &NewEntry) -> Result<JournalEntry, JournalError> {
        tracing::debug!(
            journal_id = %self.journal_id,
            title = %entry.title,
            tags = ?entry.tags,
            "Creating journal entry"
        );

        let response = self
            .http
            .post(self.journal_url("entries"))
            .bearer_auth(&self.token)
            .json(entry)
            .send()
            .await?;

        Ok(ensure_success(response).await?.json().await?)
    }
}

async fn ensure_success(response: Response) -> Result<Response, JournalError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::error!(status = status.as_u16(), body = %body, "Journal request rejected");
    Err(JournalError::Status {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(spire_url: &str) -> JournalConfig {
        JournalConfig {
            token: "token".into(),
            journal_id: "journal-1".into(),
            spire_url: spire_url.into(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn journal_urls_ignore_trailing_slash() {
        let client = BugoutJournalClient::new(&config("https://spire.bugout.dev/")).unwrap();
        assert_eq!(
            client.journal_url("search"),
            "https://spire.bugout.dev/journals/journal-1/search"
        );
        assert_eq!(
            client.journal_url("entries"),
            "https://spire.bugout.dev/journals/journal-1/entries"
        );
    }
}
