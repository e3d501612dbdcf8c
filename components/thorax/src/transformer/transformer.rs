//! Entry Transformer - journal entries in, analytics messages out.

// Local crates
use crate::{
    journal::{models::JournalEntry, query::clean_timestamp},
    metrics::metrics,
    sink::models::{Identify, Message, Properties, Track},
};

// External crates
use chrono::{DateTime, NaiveDateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::instrument;

/// Subject id used when an entry carries no identity tag.
pub const UNKNOWN_SUBJECT: &str = "unknown";

lazy_static! {
    /// Journal entry links served by the Spire API host
    static ref SPIRE_JOURNAL_LINK: Regex =
        Regex::new(r"^https://spire\.bugout\.dev/journals/").unwrap();
}

const PUBLIC_JOURNAL_LINK: &str = "https://bugout.dev/app/personal/";

/// Which tags identify the subject of an entry.
///
/// Producers have used two conventions over time, so the choice is explicit
/// configuration rather than a guess.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityPolicy {
    /// `client:<id>` identifies the subject, `session:<id>` is the fallback.
    /// `username:<name>` is associated with the subject through an identify
    /// message.
    #[default]
    Client,
    /// `session:<id>` identifies the subject. No identify messages.
    Session,
}

impl IdentityPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityPolicy::Client => "client",
            IdentityPolicy::Session => "session",
        }
    }
}

impl std::str::FromStr for IdentityPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "client" => Ok(IdentityPolicy::Client),
            "session" => Ok(IdentityPolicy::Session),
            other => Err(format!(
                "unknown identity policy {other:?}, expected \"client\" or \"session\""
            )),
        }
    }
}

// Case-insensitive, so file, environment and flag spellings agree
impl<'de> Deserialize<'de> for IdentityPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Messages for one page, in forwarding order, and the candidate cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformedPage {
    pub messages: Vec<Message>,
    /// Cleaned creation time of the page's last entry, empty for an empty page.
    pub cursor: String,
    pub entries: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Transformer {
    policy: IdentityPolicy,
}

impl Transformer {
    pub fn new(policy: IdentityPolicy) -> Self {
        Self { policy }
    }

    /// Transform every entry of a page, preserving entry order. An identify
    /// message always precedes the track message of the same entry.
    #[instrument(
        name = "thorax_transformer::transform_page",
        target = "transformer::transformer::Transformer",
        skip_all,
        level = "debug"
    )]
    pub fn transform_page(&self, entries: &[JournalEntry]) -> TransformedPage {
        let mut messages = Vec::with_capacity(entries.len());
        for entry in entries {
            messages.extend(self.transform_entry(entry));
        }

        let cursor = entries
            .last()
            .map(|entry| clean_timestamp(&entry.created_at))
            .unwrap_or_default();

        tracing::debug!(
            entries = entries.len(),
            messages = messages.len(),
            cursor = %cursor,
            "Transformed journal page"
        );
        TransformedPage {
            messages,
            cursor,
            entries: entries.len(),
        }
    }

    /// Messages for a single entry: an optional identify, then the track.
    pub fn transform_entry(&self, entry: &JournalEntry) -> Vec<Message> {
        let mut properties = parse_tags(&entry.tags);
        let subject = self.subject_id(&properties);

        let mut messages = Vec::with_capacity(2);
        if let Some(identify) = self.identify(&subject, &properties) {
            messages.push(Message::Identify(identify));
        }

        if !entry.entry_url.is_empty() {
            properties.insert(
                "link".to_string(),
                Value::String(rewrite_link(&entry.entry_url)),
            );
        }

        messages.push(Message::Track(Track {
            event: entry.title.clone(),
            user_id: subject,
            properties,
            timestamp: parse_created_at(&entry.created_at),
        }));
        messages
    }

    /// Subject id derived from parsed tags under the configured policy.
    pub fn subject_id(&self, properties: &Properties) -> String {
        let lookup = |key: &str| {
            properties
                .get(key)
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let subject = match self.policy {
            IdentityPolicy::Client => lookup("client").or_else(|| lookup("session")),
            IdentityPolicy::Session => lookup("session"),
        };
        subject.unwrap_or_else(|| UNKNOWN_SUBJECT.to_string())
    }

    fn identify(&self, subject: &str, properties: &Properties) -> Option<Identify> {
        if self.policy != IdentityPolicy::Client || subject == UNKNOWN_SUBJECT {
            return None;
        }

        let username = properties.get("username").and_then(Value::as_str)?;
        let mut traits = Properties::new();
        traits.insert("username".to_string(), Value::String(username.to_string()));

        Some(Identify {
            user_id: subject.to_string(),
            traits,
        })
    }
}

/// Split each tag on its first colon. `key:value` maps to the string value,
/// a bare `flag` maps to `true`. Later tags win on duplicate keys.
pub fn parse_tags(tags: &[String]) -> Properties {
    let mut properties = Properties::new();
    for tag in tags {
        match tag.split_once(':') {
            Some((key, value)) => {
                properties.insert(key.to_string(), Value::String(value.to_string()));
            }
            None => {
                properties.insert(tag.clone(), Value::Bool(true));
            }
        }
    }
    properties
}

/// Upgrade `http://` to `https://` and point Spire journal links at the
/// public web app.
pub fn rewrite_link(url: &str) -> String {
    let upgraded = match url.strip_prefix("http://") {
        Some(rest) => format!("https://{rest}"),
        None => url.to_string(),
    };
    SPIRE_JOURNAL_LINK
        .replace(&upgraded, PUBLIC_JOURNAL_LINK)
        .into_owned()
}

/// Parse an entry creation time. Failures are logged and yield `None`, the
/// event is still forwarded.
pub fn parse_created_at(raw: &str) -> Option<DateTime<Utc>> {
    if let Some(parsed) = try_parse_timestamp(raw) {
        return Some(parsed);
    }

    metrics::TIMESTAMP_PARSE_FAILURES.inc();
    tracing::warn!(
        created_at = %raw,
        "Failed to parse entry creation time, forwarding event without a timestamp"
    );
    None
}

/// Parse a journal or cursor timestamp, space or `T` separated, with or
/// without an offset. Offset-less values are UTC.
pub fn try_parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let cleaned = clean_timestamp(raw.trim());

    if let Ok(parsed) = DateTime::parse_from_rfc3339(&cleaned) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(&cleaned, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&cleaned, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|parsed| parsed.and_utc())
}
