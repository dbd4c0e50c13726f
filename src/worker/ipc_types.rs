//! Protocol types for parent ↔ worker communication.
//!
//! Uses JSON Lines (one JSON object per line) over stdin/stdout pipes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GenerationError, RequestError};

/// Request read from stdin. Fields other than `prompt` are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRequest {
    pub prompt: String,
}

impl WorkerRequest {
    /// Parse one raw input line (without its line terminator).
    pub fn parse(line: &[u8]) -> Result<Self, RequestError> {
        let text = std::str::from_utf8(line).map_err(|_| RequestError::InvalidUtf8)?;
        let value: Value = serde_json::from_str(text)?;
        let object = value.as_object().ok_or(RequestError::NotAnObject)?;

        match object.get("prompt") {
            Some(Value::String(prompt)) => Ok(Self {
                prompt: prompt.clone(),
            }),
            Some(_) => Err(RequestError::PromptNotString),
            None => Err(RequestError::MissingPrompt),
        }
    }
}

/// Response written to stdout: `{"text": ...}` or `{"error": ...}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum WorkerResponse {
    Text { text: String },
    Error { error: String },
}

impl WorkerResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

impl From<RequestError> for WorkerResponse {
    fn from(err: RequestError) -> Self {
        Self::error(err.to_string())
    }
}

impl From<Result<String, GenerationError>> for WorkerResponse {
    fn from(result: Result<String, GenerationError>) -> Self {
        match result {
            Ok(text) => Self::text(text),
            Err(e) => Self::error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prompt() {
        let req = WorkerRequest::parse(br#"{"prompt": "Hello"}"#).unwrap();
        assert_eq!(req.prompt, "Hello");
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let req =
            WorkerRequest::parse(br#"{"prompt": "Hi", "id": 7, "extra": {"a": [1]}}"#).unwrap();
        assert_eq!(req.prompt, "Hi");
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            WorkerRequest::parse(b"not json"),
            Err(RequestError::MalformedJson(_))
        ));
    }

    #[test]
    fn test_blank_line_is_malformed() {
        assert!(matches!(
            WorkerRequest::parse(b""),
            Err(RequestError::MalformedJson(_))
        ));
    }

    #[test]
    fn test_missing_prompt() {
        assert!(matches!(
            WorkerRequest::parse(b"{}"),
            Err(RequestError::MissingPrompt)
        ));
    }

    #[test]
    fn test_non_string_prompt() {
        for line in [
            &br#"{"prompt": 42}"#[..],
            br#"{"prompt": null}"#,
            br#"{"prompt": ["a"]}"#,
        ] {
            assert!(matches!(
                WorkerRequest::parse(line),
                Err(RequestError::PromptNotString)
            ));
        }
    }

    #[test]
    fn test_non_object() {
        assert!(matches!(
            WorkerRequest::parse(br#"["prompt"]"#),
            Err(RequestError::NotAnObject)
        ));
        assert!(matches!(
            WorkerRequest::parse(br#""Hello""#),
            Err(RequestError::NotAnObject)
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        assert!(matches!(
            WorkerRequest::parse(&[b'{', 0xff, b'}']),
            Err(RequestError::InvalidUtf8)
        ));
    }

    #[test]
    fn test_response_wire_format() {
        assert_eq!(
            serde_json::to_string(&WorkerResponse::text("hi")).unwrap(),
            r#"{"text":"hi"}"#
        );
        assert_eq!(
            serde_json::to_string(&WorkerResponse::error("bad")).unwrap(),
            r#"{"error":"bad"}"#
        );
    }

    #[test]
    fn test_generation_result_conversion() {
        let ok: WorkerResponse = Ok::<_, GenerationError>("done".to_string()).into();
        assert_eq!(ok, WorkerResponse::text("done"));

        let err: WorkerResponse = Err::<String, _>(GenerationError::EmptyPrompt).into();
        assert!(err.is_error());
    }
}
