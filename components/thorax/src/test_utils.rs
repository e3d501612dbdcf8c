//! In-memory collaborators shared by unit tests.

// Local crates
use crate::{
    journal::{
        client::{JournalClient, JournalError},
        models::{EntryResultsPage, JournalEntry, NewEntry, Order, SearchRequest},
        query::clean_timestamp,
    },
    reporter::reporter::{Report, Reporter},
    sink::{
        analytics::{AnalyticsSink, DeliveryStats},
        models::{Batch, Identify, Message, SinkError, Track},
        transport::BatchTransport,
    },
};

// External crates
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Entry with a title, creation time and tags.
pub fn entry(title: &str, created_at: &str, tags: &[&str]) -> JournalEntry {
    JournalEntry {
        entry_url: format!("https://spire.bugout.dev/journals/test/entries/{title}"),
        title: title.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        created_at: created_at.to_string(),
        ..Default::default()
    }
}

#[derive(Debug, Default)]
struct JournalState {
    entries: Vec<JournalEntry>,
    queries: Vec<String>,
    forced_next_offset: Option<u64>,
}

/// Journal that evaluates the subset of the query language thorax issues
/// (`tag:`, `not`, `created_at:>`) and paginates like the Spire API.
#[derive(Debug)]
pub struct InMemoryJournal {
    state: Mutex<JournalState>,
    searches: AtomicUsize,
    fail_searches_from: AtomicUsize,
    fail_creates: AtomicBool,
}

impl Default for InMemoryJournal {
    fn default() -> Self {
        Self {
            state: Mutex::new(JournalState::default()),
            searches: AtomicUsize::new(0),
            fail_searches_from: AtomicUsize::new(usize::MAX),
            fail_creates: AtomicBool::new(false),
        }
    }
}

impl InMemoryJournal {
    pub fn with_entries(entries: Vec<JournalEntry>) -> Self {
        let journal = Self::default();
        for entry in entries {
            journal.push(entry);
        }
        journal
    }

    pub fn push(&self, entry: JournalEntry) {
        self.state.lock().unwrap().entries.push(entry);
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.state.lock().unwrap().entries.clone()
    }

    /// Every query string searched so far, in order.
    pub fn queries(&self) -> Vec<String> {
        self.state.lock().unwrap().queries.clone()
    }

    pub fn fail_searches(&self, fail: bool) {
        self.fail_searches_after(if fail { 0 } else { usize::MAX });
    }

    /// Let `succeeding` searches through, then fail every one after.
    pub fn fail_searches_after(&self, succeeding: usize) {
        self.fail_searches_from.store(succeeding, Ordering::SeqCst);
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    /// Report this next offset on every page instead of the real one.
    pub fn force_next_offset(&self, next_offset: Option<u64>) {
        self.state.lock().unwrap().forced_next_offset = next_offset;
    }

    fn unavailable() -> JournalError {
        JournalError::Status {
            status: 503,
            body: "journal unavailable".to_string(),
        }
    }
}

fn term_matches(entry: &JournalEntry, term: &str) -> bool {
    if let Some(tag) = term.strip_prefix("tag:") {
        return entry.tags.iter().any(|t| t == tag);
    }
    if let Some(bound) = term.strip_prefix("created_at:>") {
        return clean_timestamp(&entry.created_at).as_str() > bound;
    }
    true
}

fn query_matches(entry: &JournalEntry, query: &str) -> bool {
    let mut terms = query.split_whitespace();
    while let Some(term) = terms.next() {
        if term == "not" {
            if let Some(negated) = terms.next() {
                if term_matches(entry, negated) {
                    return false;
                }
            }
            continue;
        }
        if !term_matches(entry, term) {
            return false;
        }
    }
    true
}

impl JournalClient for InMemoryJournal {
    async fn search(&self, request: &SearchRequest) -> Result<EntryResultsPage, JournalError> {
        let attempt = self.searches.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        state.queries.push(request.query.clone());
        if attempt >= self.fail_searches_from.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }

        let mut matching: Vec<JournalEntry> = state
            .entries
            .iter()
            .filter(|entry| query_matches(entry, &request.query))
            .cloned()
            .collect();
        if request.order == Order::Desc {
            matching.reverse();
        }

        let total = matching.len() as u64;
        let end = (request.offset + request.limit).min(total);
        let results = if request.offset < total {
            matching[request.offset as usize..end as usize].to_vec()
        } else {
            Vec::new()
        };
        let next_offset = match state.forced_next_offset {
            Some(forced) => forced,
            None if request.offset + request.limit < total => request.offset + request.limit,
            None => 0,
        };

        Ok(EntryResultsPage {
            results,
            total_results: total,
            offset: request.offset,
            next_offset,
        })
    }

    async fn create_entry(&self, new_entry: &NewEntry) -> Result<JournalEntry, JournalError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }

        let stored = JournalEntry {
            title: new_entry.title.clone(),
            content: Some(new_entry.content.clone()),
            tags: new_entry.tags.clone(),
            created_at: chrono::Utc::now()
                .format("%Y-%m-%d %H:%M:%S%.6f")
                .to_string(),
            context_type: Some(new_entry.context.kind.clone()),
            context_id: Some(new_entry.context.id.clone()),
            context_url: Some(new_entry.context.url.clone()),
            ..Default::default()
        };
        self.push(stored.clone());
        Ok(stored)
    }
}

/// Sink that keeps every accepted message.
#[derive(Debug, Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<Message>>,
    fail: AtomicBool,
    closed: AtomicBool,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    pub fn tracks(&self) -> Vec<Track> {
        self.messages()
            .into_iter()
            .filter_map(|message| match message {
                Message::Track(track) => Some(track),
                Message::Identify(_) => None,
            })
            .collect()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn accept(&self, message: Message) -> Result<(), SinkError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SinkError::Validation("recording sink rejects everything"));
        }
        if self.is_closed() {
            return Err(SinkError::Closed);
        }
        message.validate()?;
        self.messages.lock().unwrap().push(message);
        Ok(())
    }
}

impl AnalyticsSink for RecordingSink {
    async fn track(&self, track: Track) -> Result<(), SinkError> {
        self.accept(Message::Track(track))
    }

    async fn identify(&self, identify: Identify) -> Result<(), SinkError> {
        self.accept(Message::Identify(identify))
    }

    async fn close(&mut self) -> DeliveryStats {
        self.closed.store(true, Ordering::SeqCst);
        DeliveryStats {
            delivered: self.messages.lock().unwrap().len() as u64,
            ..Default::default()
        }
    }
}

/// Reporter that keeps every published report.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<Report>>,
}

impl RecordingReporter {
    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap().clone()
    }
}

impl Reporter for RecordingReporter {
    async fn publish(&self, report: Report) {
        self.reports.lock().unwrap().push(report);
    }
}

/// Batch transport that records batches instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    batches: Arc<Mutex<Vec<Batch>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingTransport {
    pub fn batches(&self) -> Vec<Batch> {
        self.batches.lock().unwrap().clone()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.batches()
            .into_iter()
            .flat_map(|batch| batch.batch)
            .filter_map(|envelope| match envelope.message {
                Message::Track(track) => Some(track.event),
                Message::Identify(_) => None,
            })
            .collect()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl BatchTransport for RecordingTransport {
    async fn send_batch(&self, batch: &Batch) -> Result<(), SinkError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected {
                status: 500,
                body: "collector unavailable".to_string(),
            });
        }
        self.batches.lock().unwrap().push(batch.clone());
        Ok(())
    }
}
