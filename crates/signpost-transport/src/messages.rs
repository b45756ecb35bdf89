//! Message payloads exchanged between signpost peers.
//!
//! Each payload is serialized to JSON and carried as the `data` field of an
//! [`Envelope`](crate::wire::Envelope). The envelope's `type` field names
//! which payload to expect.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Message kinds
// ---------------------------------------------------------------------------

/// The envelope `type` tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// A query for a key (`"request"`).
    Request,
    /// The key was found (`"positive"`).
    Positive,
    /// The key could not be found through this peer (`"negative"`).
    Negative,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Positive => "positive",
            Self::Negative => "negative",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Ask a peer where `key` can be found.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Correlates the eventual answer across every hop.
    pub request_id: String,
    /// The content key being searched for.
    pub key: String,
    /// How long the asker will wait for the answer, in milliseconds.
    /// Absent means the receiver may take its own full reply timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_ms: Option<u64>,
}

impl Query {
    /// The asker's reply budget, if it sent one.
    pub fn budget(&self) -> Option<Duration> {
        self.budget_ms.map(Duration::from_millis)
    }
}

/// Answer to a query: `node_id` holds the content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Found {
    pub request_id: String,
    /// Listen address of the holder.
    pub node_id: String,
}

/// Answer to a query: the peer refuses or could not find the key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotFound {
    pub request_id: String,
}

// ---------------------------------------------------------------------------
// Typed message
// ---------------------------------------------------------------------------

/// A decoded payload together with its kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Query(Query),
    Found(Found),
    NotFound(NotFound),
}

impl Message {
    /// The envelope tag for this payload.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Query(_) => MessageKind::Request,
            Self::Found(_) => MessageKind::Positive,
            Self::NotFound(_) => MessageKind::Negative,
        }
    }

    /// The request this message belongs to.
    pub fn request_id(&self) -> &str {
        match self {
            Self::Query(q) => &q.request_id,
            Self::Found(f) => &f.request_id,
            Self::NotFound(n) => &n.request_id,
        }
    }

    pub fn query(request_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Query(Query {
            request_id: request_id.into(),
            key: key.into(),
            budget_ms: None,
        })
    }

    /// A query whose receiver must answer within `budget`.
    pub fn query_within(
        request_id: impl Into<String>,
        key: impl Into<String>,
        budget: Duration,
    ) -> Self {
        Self::Query(Query {
            request_id: request_id.into(),
            key: key.into(),
            budget_ms: Some(u64::try_from(budget.as_millis()).unwrap_or(u64::MAX)),
        })
    }

    pub fn found(request_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self::Found(Found {
            request_id: request_id.into(),
            node_id: node_id.into(),
        })
    }

    pub fn not_found(request_id: impl Into<String>) -> Self {
        Self::NotFound(NotFound {
            request_id: request_id.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        assert_eq!(
            serde_json::to_string(&MessageKind::Request).expect("serialize"),
            "\"request\""
        );
        assert_eq!(
            serde_json::to_string(&MessageKind::Positive).expect("serialize"),
            "\"positive\""
        );
        assert_eq!(
            serde_json::to_string(&MessageKind::Negative).expect("serialize"),
            "\"negative\""
        );
        assert!(serde_json::from_str::<MessageKind>("\"query\"").is_err());
    }

    #[test]
    fn test_payload_field_names() {
        let found = serde_json::to_value(Found {
            request_id: "r1".to_string(),
            node_id: "10.0.0.1:43210".to_string(),
        })
        .expect("serialize");
        assert_eq!(
            found,
            serde_json::json!({"request_id": "r1", "node_id": "10.0.0.1:43210"})
        );

        let query = serde_json::to_value(Query {
            request_id: "r2".to_string(),
            key: "movie".to_string(),
            budget_ms: None,
        })
        .expect("serialize");
        assert_eq!(query, serde_json::json!({"request_id": "r2", "key": "movie"}));
    }

    #[test]
    fn test_query_budget() {
        let Message::Query(query) = Message::query_within("r1", "k", Duration::from_millis(1500))
        else {
            unreachable!("query_within builds a query");
        };
        let value = serde_json::to_value(&query).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({"request_id": "r1", "key": "k", "budget_ms": 1500})
        );

        // Peers that never send a budget still decode.
        let plain: Query =
            serde_json::from_value(serde_json::json!({"request_id": "r2", "key": "k"}))
                .expect("decode");
        assert_eq!(plain.budget(), None);
        let budgeted: Query = serde_json::from_value(value).expect("decode");
        assert_eq!(budgeted.budget(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_message_accessors() {
        let msg = Message::query("r1", "k");
        assert_eq!(msg.kind(), MessageKind::Request);
        assert_eq!(msg.request_id(), "r1");

        assert_eq!(Message::found("r2", "a").kind(), MessageKind::Positive);
        assert_eq!(Message::not_found("r3").request_id(), "r3");
    }
}
