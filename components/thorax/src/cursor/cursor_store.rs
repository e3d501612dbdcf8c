//! Cursor Store - where did the last run leave off.
//!
//! Named cursors are persisted as ordinary entries inside the journal being
//! synced. Each checkpoint is a new entry tagged `type:cursor`, so history is
//! kept and the newest checkpoint wins on load. The entry fetch query
//! excludes these entries (see [`crate::journal::query::EXCLUDE_CURSORS_FILTER`]).

// Local crates
use crate::journal::{
    client::{JournalClient, JournalError},
    models::{EntryContext, NewEntry, Order, SearchRequest},
};

// External crates
use std::future::Future;
use std::sync::Arc;
use tracing::instrument;

/// Version of the checkpoint entry layout.
pub const CURSOR_SCHEMA_VERSION: &str = "1";

/// Cursor store error handling
#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    #[error("failed to retrieve cursor {name:?}: {source}")]
    Retrieval {
        name: String,
        #[source]
        source: JournalError,
    },
    #[error("failed to persist cursor {name:?}: {source}")]
    Persist {
        name: String,
        #[source]
        source: JournalError,
    },
}

/// Where a run starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorSource {
    /// Start from the beginning of the journal, persist nothing.
    None,
    /// Supplied by the caller for this run only.
    Ephemeral(String),
    /// Loaded from, and persisted to, the cursor store under this name.
    Named(String),
    /// Explicit starting point, progress persisted under the name.
    EphemeralNamed { cursor: String, name: String },
}

impl CursorSource {
    /// Resolve the source from the optional name and explicit cursor.
    pub fn from_options(name: Option<&str>, cursor: Option<&str>) -> Self {
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        let cursor = cursor.map(str::trim).filter(|c| !c.is_empty());
        match (name, cursor) {
            (None, None) => CursorSource::None,
            (None, Some(cursor)) => CursorSource::Ephemeral(cursor.to_string()),
            (Some(name), None) => CursorSource::Named(name.to_string()),
            (Some(name), Some(cursor)) => CursorSource::EphemeralNamed {
                cursor: cursor.to_string(),
                name: name.to_string(),
            },
        }
    }

    /// The name progress is persisted under, if any.
    pub fn persist_name(&self) -> Option<&str> {
        match self {
            CursorSource::Named(name) | CursorSource::EphemeralNamed { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Checkpoint storage.
pub trait CursorStore {
    /// Most recent cursor value stored under `name`, or an empty string.
    fn load(&self, name: &str) -> impl Future<Output = Result<String, CursorError>> + Send;

    /// Store a new cursor value under `name`.
    fn save(&self, name: &str, cursor: &str)
    -> impl Future<Output = Result<(), CursorError>> + Send;
}

/// Cursor store backed by tagged entries in the synced journal itself.
#[derive(Debug)]
pub struct JournalCursorStore<J> {
    journal: Arc<J>,
    thorax_version: String,
}

impl<J> JournalCursorStore<J> {
    pub fn new(journal: Arc<J>, thorax_version: impl Into<String>) -> Self {
        Self {
            journal,
            thorax_version: thorax_version.into(),
        }
    }
}

/// Tags identifying the checkpoints of one cursor name.
pub fn cursor_lookup_tags(name: &str) -> Vec<String> {
    vec![
        "type:cursor".to_string(),
        format!("cursor_schema:{CURSOR_SCHEMA_VERSION}"),
        format!("cursor:{name}"),
    ]
}

/// Search query for the newest checkpoint of `name`.
pub fn cursor_lookup_query(name: &str) -> String {
    cursor_lookup_tags(name)
        .iter()
        .map(|tag| format!("tag:{tag}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Checkpoint entry for `name` carrying `cursor`.
pub fn checkpoint_entry(name: &str, cursor: &str, thorax_version: &str) -> NewEntry {
    let mut tags = cursor_lookup_tags(name);
    tags.push(format!("thorax_version:{thorax_version}"));

    NewEntry {
        title: format!("thorax cursor: {name}"),
        content: cursor.to_string(),
        tags,
        context: EntryContext {
            kind: "thorax".to_string(),
            id: name.to_string(),
            url: cursor.to_string(),
        },
    }
}

impl<J> CursorStore for JournalCursorStore<J>
where
    J: JournalClient + Send + Sync,
{
    #[instrument(
        name = "thorax_cursor_store::load",
        target = "cursor::cursor_store::JournalCursorStore",
        skip(self),
        level = "debug"
    )]
    async fn load(&self, name: &str) -> Result<String, CursorError> {
        let request = SearchRequest {
            query: cursor_lookup_query(name),
            limit: 1,
            offset: 0,
            order: Order::Desc,
            include_content: false,
        };

        let page = self
            .journal
            .search(&request)
            .await
            .map_err(|source| CursorError::Retrieval {
                name: name.to_string(),
                source,
            })?;

        let cursor = page
            .results
            .into_iter()
            .next()
            .and_then(|entry| entry.context_url)
            .unwrap_or_default();

        if cursor.is_empty() {
            tracing::info!(cursor_name = %name, "No stored cursor found, starting from the beginning");
        } else {
            tracing::info!(cursor_name = %name, cursor = %cursor, "Loaded stored cursor");
        }
        Ok(cursor)
    }

    #[instrument(
        name = "thorax_cursor_store::save",
        target = "cursor::cursor_store::JournalCursorStore",
        skip(self),
        level = "debug"
    )]
    async fn save(&self, name: &str, cursor: &str) -> Result<(), CursorError> {
        let entry = checkpoint_entry(name, cursor, &self.thorax_version);
        self.journal
            .create_entry(&entry)
            .await
            .map_err(|source| CursorError::Persist {
                name: name.to_string(),
                source,
            })?;

        tracing::debug!(cursor_name = %name, cursor = %cursor, "Cursor checkpoint persisted");
        Ok(())
    }
}
