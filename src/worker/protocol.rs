//! IPC protocol between the coordinator and its workers.
//!
//! Messages are JSON-serialized and newline-delimited. A dispatch is two
//! requests, the tag and then the parameter, answered by one response.

use crate::commands::DispatchTag;
use serde::{Deserialize, Serialize};

/// Request from coordinator to worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkRequest {
    /// Which command to run next, or [`DispatchTag::TERMINATE`].
    #[serde(rename = "tag")]
    Tag { tag: DispatchTag },

    /// Parameter for the command announced by the preceding tag.
    #[serde(rename = "parameter")]
    Parameter { value: String },
}

/// Response from worker to coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkResponse {
    /// Handler output.
    #[serde(rename = "result")]
    Result { text: String },

    /// The worker could not make sense of the request it owed a reply for.
    #[serde(rename = "error")]
    Error { message: String },
}

impl WorkRequest {
    pub fn tag(tag: DispatchTag) -> Self {
        Self::Tag { tag }
    }

    pub fn terminate() -> Self {
        Self::Tag {
            tag: DispatchTag::TERMINATE,
        }
    }

    pub fn parameter(value: impl Into<String>) -> Self {
        Self::Parameter {
            value: value.into(),
        }
    }

    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from JSON line.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

impl WorkResponse {
    pub fn result(text: impl Into<String>) -> Self {
        Self::Result { text: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from JSON line.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_request_wire_format() {
        let line = WorkRequest::tag(DispatchTag::PRIMES).to_line().unwrap();
        assert_eq!(line, "{\"type\":\"tag\",\"tag\":1}\n");
        assert_eq!(
            WorkRequest::from_line(&line).unwrap(),
            WorkRequest::tag(DispatchTag::PRIMES)
        );
    }

    #[test]
    fn test_terminate_is_a_reserved_tag() {
        let line = WorkRequest::terminate().to_line().unwrap();
        assert!(line.contains("99"));
        match WorkRequest::from_line(&line).unwrap() {
            WorkRequest::Tag { tag } => assert!(tag.is_terminate()),
            other => panic!("Expected Tag variant, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tag_number_still_parses() {
        let parsed = WorkRequest::from_line(r#"{"type":"tag","tag":7}"#).unwrap();
        assert_eq!(parsed, WorkRequest::tag(DispatchTag(7)));
    }

    #[test]
    fn test_parameter_request() {
        let line = WorkRequest::parameter("ab").to_line().unwrap();
        assert!(line.ends_with('\n'));
        assert!(line.contains("parameter"));
        assert_eq!(
            WorkRequest::from_line(&line).unwrap(),
            WorkRequest::parameter("ab")
        );
    }

    #[test]
    fn test_multiline_result_stays_on_one_line() {
        let resp = WorkResponse::result("Anagrams of ab:\nab\nba\n");
        let line = resp.to_line().unwrap();
        assert_eq!(line.matches('\n').count(), 1);
        assert_eq!(WorkResponse::from_line(&line).unwrap(), resp);
    }

    #[test]
    fn test_error_response() {
        let line = WorkResponse::error("bad request").to_line().unwrap();
        match WorkResponse::from_line(&line).unwrap() {
            WorkResponse::Error { message } => assert_eq!(message, "bad request"),
            other => panic!("Expected Error variant, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(WorkRequest::from_line("not json").is_err());
        assert!(WorkResponse::from_line(r#"{"type":"ready"}"#).is_err());
    }
}
