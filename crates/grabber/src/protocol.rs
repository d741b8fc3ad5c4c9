//! Wire types of the remote gateway. Every request and response is wrapped in
//! `{"messages": ["<inner json>"]}`; only the first message is meaningful.

use dqmirror_core::error::{MirrorError, Result};
use dqmirror_core::model::Header;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upper bound the remote applies to one sync batch.
pub const MAX_HEADERS_PER_SYNC: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub messages: Vec<String>,
}

impl Envelope {
    pub fn wrap<T: Serialize>(inner: &T) -> Result<Self> {
        let text = serde_json::to_string(inner)
            .map_err(|e| MirrorError::Internal(format!("encode request failed: {e}")))?;
        Ok(Self {
            messages: vec![text],
        })
    }

    pub fn open<T: DeserializeOwned>(self) -> Result<T> {
        let first = self
            .messages
            .into_iter()
            .next()
            .ok_or_else(|| MirrorError::Payload("response envelope has no messages".to_string()))?;
        serde_json::from_str(&first)
            .map_err(|e| MirrorError::Payload(format!("bad inner message: {e}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RemoteRequest {
    SyncRequest { known_rev: i64 },
    RequestDocuments { ids: Vec<String> },
}

/// The remote reports either the revision it reached or the span it covered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RevisionMark {
    Single(i64),
    Span(i64, i64),
}

impl RevisionMark {
    pub fn upper(self) -> i64 {
        match self {
            Self::Single(rev) => rev,
            Self::Span(_, to) => to,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncResponse {
    pub headers: Vec<Header>,
    #[serde(default)]
    pub rev: Option<RevisionMark>,
    #[serde(default)]
    pub total_sent: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentsResponse {
    pub documents: Vec<Value>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn requests_are_tagged_by_event() {
        let env = Envelope::wrap(&RemoteRequest::SyncRequest { known_rev: 12 }).unwrap();
        let inner: Value = serde_json::from_str(&env.messages[0]).unwrap();
        assert_eq!(inner, json!({"event": "sync_request", "known_rev": 12}));

        let env = Envelope::wrap(&RemoteRequest::RequestDocuments {
            ids: vec!["a".into()],
        })
        .unwrap();
        let inner: Value = serde_json::from_str(&env.messages[0]).unwrap();
        assert_eq!(inner, json!({"event": "request_documents", "ids": ["a"]}));
    }

    #[test]
    fn sync_response_accepts_both_rev_shapes() {
        let span = json!({"headers": [], "rev": [5, 9], "total_sent": 0}).to_string();
        let parsed: SyncResponse = Envelope { messages: vec![span] }.open().unwrap();
        assert_eq!(parsed.rev, Some(RevisionMark::Span(5, 9)));
        assert_eq!(parsed.rev.unwrap().upper(), 9);

        let single = json!({"headers": [{"_id": "x", "_rev": 3}], "rev": 3}).to_string();
        let parsed: SyncResponse = Envelope { messages: vec![single] }.open().unwrap();
        assert_eq!(parsed.rev, Some(RevisionMark::Single(3)));
        assert_eq!(parsed.headers[0].rev, Some(3));
    }

    #[test]
    fn shape_errors_are_payload_errors() {
        let empty = Envelope { messages: vec![] }.open::<SyncResponse>();
        assert!(matches!(empty, Err(MirrorError::Payload(_))));

        let no_headers = Envelope {
            messages: vec![json!({"rev": 1}).to_string()],
        }
        .open::<SyncResponse>();
        assert!(matches!(no_headers, Err(MirrorError::Payload(_))));

        let not_json = Envelope {
            messages: vec!["<html>".to_string()],
        }
        .open::<DocumentsResponse>();
        assert!(matches!(not_json, Err(MirrorError::Payload(_))));
    }
}
