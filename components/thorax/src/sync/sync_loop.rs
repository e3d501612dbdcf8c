//! Sync Loop - the cursor based incremental forwarding loop.
//!
//! One invocation runs until the journal is exhausted for the starting
//! cursor, then returns:
//!
//! ```text
//! FETCHING -> TRANSFORMING_AND_FORWARDING -> ADVANCING_CURSOR -> CONTINUE | HALT
//! ```
//!
//! Delivery is at-least-once. The cursor only advances after a whole page
//! was enqueued, and a lost checkpoint write only means the next run
//! re-forwards entries it already sent.

// Local crates
use crate::{
    cursor::cursor_store::{CursorError, CursorSource, CursorStore},
    journal::{client::{JournalClient, JournalError}, query::entries_request},
    metrics::metrics,
    sink::{analytics::AnalyticsSink, models::{Message, SinkError}},
    transformer::transformer::{Transformer, try_parse_timestamp},
};

// External crates
use std::time::Duration;
use tracing::instrument;

/// Sync loop error handling. Every variant is fatal for the run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A journal search failed
    #[error("failed to fetch journal page at offset {offset}: {source}")]
    Fetch {
        offset: u64,
        #[source]
        source: JournalError,
    },
    /// The named cursor could not be retrieved
    #[error("failed to load starting cursor: {0}")]
    CursorLoad(#[from] CursorError),
    /// The sink rejected a message at enqueue
    #[error("failed to forward entry to the analytics sink: {0}")]
    Forward(#[from] SinkError),
    /// The journal returned a next offset that does not move forward
    #[error("pagination stalled: next offset {next_offset} does not advance past offset {offset}")]
    StalledPagination { offset: u64, next_offset: u64 },
}

/// Per-run settings.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Page size for journal searches
    pub batch_size: u64,
    /// Pause between pages, only applied while more pages remain
    pub delay: Duration,
    /// Where the starting cursor comes from and where progress goes
    pub source: CursorSource,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Search pages fetched
    pub pages: u64,
    /// Journal entries transformed and forwarded
    pub entries: u64,
    /// Analytics messages enqueued, identify and track together
    pub messages: u64,
    /// Cursor the run started from
    pub start_cursor: String,
    /// Cursor reached, unchanged from `start_cursor` when nothing was new
    pub cursor: String,
    pub checkpoints_written: u64,
    /// Checkpoint writes that failed and were skipped
    pub checkpoint_failures: u64,
}

/// Orchestrates fetch, transform, forward and checkpoint for one run.
#[derive(Debug)]
pub struct SyncLoop<'a, J, C, S> {
    journal: &'a J,
    cursors: &'a C,
    sink: &'a S,
    transformer: &'a Transformer,
    options: SyncOptions,
}

impl<'a, J, C, S> SyncLoop<'a, J, C, S>
where
    J: JournalClient,
    C: CursorStore,
    S: AnalyticsSink,
{
    /// Borrow the collaborators for a single run.
    pub fn new(
        journal: &'a J,
        cursors: &'a C,
        sink: &'a S,
        transformer: &'a Transformer,
        options: SyncOptions,
    ) -> Self {
        Self {
            journal,
            cursors,
            sink,
            transformer,
            options,
        }
    }

    /// Run until the journal reports no further pages.
    #[instrument(
        name = "thorax_sync::run",
        target = "sync::sync_loop::SyncLoop",
        skip_all,
        level = "info"
    )]
    pub async fn run(&self) -> Result<SyncSummary, SyncError> {
        let start_cursor = self.start_cursor().await?;
        let batch_size = self.options.batch_size.max(1);

        tracing::info!(
            start_cursor = %start_cursor,
            batch_size,
            delay = ?self.options.delay,
            cursor_name = ?self.options.source.persist_name(),
            "Starting journal sync"
        );

        let mut summary = SyncSummary {
            start_cursor: start_cursor.clone(),
            cursor: start_cursor.clone(),
            ..Default::default()
        };
        let mut offset = 0u64;

        loop {
            // FETCHING
            let request = entries_request(Some(&start_cursor), batch_size, offset);
            let page = self
                .journal
                .search(&request)
                .await
                .map_err(|source| SyncError::Fetch { offset, source })?;
            metrics::PAGES_FETCHED.inc();
            summary.pages += 1;

            let loading_until = (offset + batch_size).min(page.total_results);
            println!(
                "Loading to Segment: {} to {} of {}",
                offset, loading_until, page.total_results
            );

            let halt = page.next_offset == 0 || page.next_offset >= page.total_results;
            if !halt && page.next_offset <= offset {
                tracing::error!(
                    offset,
                    next_offset = page.next_offset,
                    total_results = page.total_results,
                    "Journal pagination does not advance"
                );
                return Err(SyncError::StalledPagination {
                    offset,
                    next_offset: page.next_offset,
                });
            }
            offset = page.next_offset;

            // TRANSFORMING_AND_FORWARDING
            let transformed = self.transformer.transform_page(&page.results);
            summary.messages += self.forward(transformed.messages).await? as u64;
            summary.entries += transformed.entries as u64;
            metrics::ENTRIES_FORWARDED.inc_by(transformed.entries as f64);

            // ADVANCING_CURSOR, an empty page keeps the previous cursor
            if !transformed.cursor.is_empty() {
                summary.cursor = transformed.cursor;
                if let Some(parsed) = try_parse_timestamp(&summary.cursor) {
                    metrics::LAST_CURSOR_SECONDS.set(parsed.timestamp() as f64);
                }
                let written = self.checkpoint(&summary.cursor).await;
                match written {
                    Some(true) => summary.checkpoints_written += 1,
                    Some(false) => summary.checkpoint_failures += 1,
                    None => {}
                }
            }
            println!("New cursor: {}", summary.cursor);

            if halt {
                tracing::info!(
                    pages = summary.pages,
                    entries = summary.entries,
                    cursor = %summary.cursor,
                    "Journal exhausted for this run"
                );
                return Ok(summary);
            }

            tracing::debug!(next_offset = offset, delay = ?self.options.delay, "More pages remain");
            tokio::time::sleep(self.options.delay).await;
        }
    }

    async fn start_cursor(&self) -> Result<String, SyncError> {
        Ok(match &self.options.source {
            CursorSource::None => String::new(),
            CursorSource::Ephemeral(cursor) | CursorSource::EphemeralNamed { cursor, .. } => {
                cursor.clone()
            }
            CursorSource::Named(name) => self.cursors.load(name).await?,
        })
    }

    /// Enqueue messages in order. The first rejection aborts the run.
    async fn forward(&self, messages: Vec<Message>) -> Result<usize, SyncError> {
        let count = messages.len();
        for message in messages {
            match message {
                Message::Identify(identify) => {
                    self.sink.identify(identify).await?;
                    metrics::IDENTIFY_EVENTS.inc();
                }
                Message::Track(track) => self.sink.track(track).await?,
            }
        }
        Ok(count)
    }

    /// Persist `cursor` when a cursor name is configured. Returns whether the
    /// write succeeded, `None` when there is nothing to persist under. Failures
    /// are logged, never fatal.
    async fn checkpoint(&self, cursor: &str) -> Option<bool> {
        let name = self.options.source.persist_name()?;

        match self.cursors.save(name, cursor).await {
            Ok(()) => Some(true),
            Err(e) => {
                metrics::CHECKPOINT_WRITE_FAILURES.inc();
                tracing::warn!(
                    error = %e,
                    cursor_name = %name,
                    cursor = %cursor,
                    "Failed to persist cursor checkpoint, continuing"
                );
                Some(false)
            }
        }
    }
}
