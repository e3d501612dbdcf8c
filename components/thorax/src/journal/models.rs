// External crates
use serde::{Deserialize, Deserializer, Serialize};

/// A single journal entry as returned by the Bugout search API.
///
/// Entries are read-only from thorax's point of view, with the exception of
/// cursor checkpoints which are created through [`NewEntry`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    #[serde(default)]
    pub entry_url: String,
    #[serde(default)]
    pub content_url: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Space separated date-time, e.g. `2023-01-01 00:00:00.123456+00:00`
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub context_type: Option<String>,
    #[serde(default)]
    pub context_id: Option<String>,
    /// Reused by cursor checkpoints to carry the cursor value
    #[serde(default)]
    pub context_url: Option<String>,
}

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EntryResultsPage {
    #[serde(default)]
    pub results: Vec<JournalEntry>,
    #[serde(default)]
    pub total_results: u64,
    #[serde(default)]
    pub offset: u64,
    /// `0` means there are no further pages. The API sends `null` for that.
    #[serde(default, deserialize_with = "null_as_zero")]
    pub next_offset: u64,
}

/// Sort direction for search results, by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    pub fn as_str(&self) -> &'static str {
        match self {
            Order::Asc => "asc",
            Order::Desc => "desc",
        }
    }
}

/// Search request issued against a single journal.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub limit: u64,
    pub offset: u64,
    pub order: Order,
    pub include_content: bool,
}

/// Context object attached to a newly created entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryContext {
    #[serde(rename = "context_type")]
    pub kind: String,
    #[serde(rename = "context_id")]
    pub id: String,
    #[serde(rename = "context_url")]
    pub url: String,
}

/// Entry creation payload. Only used to persist cursor checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewEntry {
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub context: EntryContext,
}

fn null_as_zero<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or(0))
}
