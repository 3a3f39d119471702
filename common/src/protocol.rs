//! Request and response envelopes exchanged with the control endpoint.
//!
//! Both directions travel as JSON inside WebSocket text frames, one envelope
//! per frame.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised while encoding or decoding an envelope
#[derive(Error, Debug)]
pub enum CodecError {
    /// The inbound frame is not a valid request envelope
    #[error("malformed request envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The response could not be serialized
    #[error("failed to encode response: {0}")]
    Encode(#[source] serde_json::Error),
}

/// One named configuration blob handed to a script
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigPayload {
    #[serde(default, deserialize_with = "null_as_default")]
    pub filename: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub config:   String,
}

impl ConfigPayload {
    pub fn new<F: Into<String>, C: Into<String>>(filename: F, config: C) -> Self {
        Self {
            filename: filename.into(),
            config:   config.into(),
        }
    }
}

/// Inbound command request.
///
/// Keys match case-insensitively and `null` leaves a field at its default,
/// so `{"RequestId":"r1","Command":"3","data":null}` is a valid request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Correlation token chosen by the caller, echoed back untouched
    #[serde(
        rename(serialize = "requestId", deserialize = "requestid"),
        default,
        deserialize_with = "null_as_default"
    )]
    pub request_id: String,
    /// Command identifier
    #[serde(default, deserialize_with = "null_as_default")]
    pub command:    String,
    /// Configuration payloads, possibly empty
    #[serde(default, deserialize_with = "payloads")]
    pub data:       Vec<ConfigPayload>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A `null` list is empty and a `null` entry is an empty payload
fn payloads<'de, D>(deserializer: D) -> Result<Vec<ConfigPayload>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Option::<Vec<Option<ConfigPayload>>>::deserialize(deserializer)?;
    Ok(entries
        .unwrap_or_default()
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect())
}

/// Lowercase every object key so field names match regardless of case
fn fold_keys(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let entries = std::mem::take(map);
            for (key, mut inner) in entries {
                fold_keys(&mut inner);
                map.insert(key.to_lowercase(), inner);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(fold_keys),
        _ => {}
    }
}

/// Outcome reported back for a processed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failed,
}

/// Body of a response envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseData {
    /// Command echoed from the request
    pub command: String,
    /// Combined stdout/stderr of the script
    pub output:  String,
    pub status:  Status,
}

/// Outbound result envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Copied verbatim from the originating request
    pub request_id: String,
    pub data:       ResponseData,
}

/// Parse a text frame into a request envelope
pub fn decode_request(text: &str) -> Result<Request, CodecError> {
    let mut value: Value = serde_json::from_str(text).map_err(CodecError::Malformed)?;
    if value.is_null() {
        return Ok(Request::default());
    }
    fold_keys(&mut value);
    serde_json::from_value(value).map_err(CodecError::Malformed)
}

/// Serialize a response envelope into the text of one frame
pub fn encode_response(response: &Response) -> Result<String, CodecError> {
    serde_json::to_string(response).map_err(CodecError::Encode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_full_request() {
        let request = decode_request(concat!(
            r#"{"requestId":"r1","command":"1","data":["#,
            r#"{"filename":"a.conf","config":"x=1"},"#,
            r#"{"filename":"b.conf","config":"y=2"}]}"#,
        ))
        .unwrap();

        assert_eq!(request.request_id, "r1");
        assert_eq!(request.command, "1");
        assert_eq!(
            request.data,
            vec![
                ConfigPayload::new("a.conf", "x=1"),
                ConfigPayload::new("b.conf", "y=2"),
            ]
        );
    }

    #[test]
    fn missing_fields_decode_as_empty() {
        let request = decode_request(r#"{"command":"3"}"#).unwrap();
        assert_eq!(request.request_id, "");
        assert_eq!(request.command, "3");
        assert!(request.data.is_empty());

        let request = decode_request(r#"{"requestId":"r9","command":"0","data":null}"#).unwrap();
        assert!(request.data.is_empty());
    }

    #[test]
    fn null_string_fields_decode_as_empty() {
        let request = decode_request(concat!(
            r#"{"requestId":"r1","command":"1","#,
            r#""data":[{"filename":"a","config":null}]}"#,
        ))
        .unwrap();
        assert_eq!(request.request_id, "r1");
        assert_eq!(request.data, vec![ConfigPayload::new("a", "")]);

        let request =
            decode_request(r#"{"requestId":null,"command":null,"data":[null,{"filename":null}]}"#)
                .unwrap();
        assert_eq!(request.request_id, "");
        assert_eq!(request.command, "");
        assert_eq!(request.data, vec![ConfigPayload::default(), ConfigPayload::default()]);
    }

    #[test]
    fn null_envelope_is_an_empty_request() {
        assert_eq!(decode_request("null").unwrap(), Request::default());
    }

    #[test]
    fn keys_match_regardless_of_case() {
        let request = decode_request(r#"{"RequestId":"r7","Command":"3","data":[]}"#).unwrap();
        assert_eq!(request.request_id, "r7");
        assert_eq!(request.command, "3");

        let request = decode_request(
            r#"{"REQUESTID":"r8","command":"0","Data":[{"FileName":"site","CONFIG":"on"}]}"#,
        )
        .unwrap();
        assert_eq!(request.request_id, "r8");
        assert_eq!(request.data, vec![ConfigPayload::new("site", "on")]);
    }

    #[test]
    fn config_values_keep_their_case() {
        let request = decode_request(concat!(
            r#"{"requestId":"AbC","command":"1","#,
            r#""data":[{"filename":"A","config":"{\"K\":1}"}]}"#,
        ))
        .unwrap();
        assert_eq!(request.request_id, "AbC");
        assert_eq!(request.data, vec![ConfigPayload::new("A", r#"{"K":1}"#)]);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let request =
            decode_request(r#"{"requestId":"r1","command":"3","data":[],"hello":"world"}"#)
                .unwrap();
        assert_eq!(request.command, "3");
    }

    #[test]
    fn rejects_malformed_envelopes() {
        assert!(matches!(
            decode_request("not json"),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            decode_request(r#"{"requestId":7,"command":"3"}"#),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            decode_request(r#"{"requestId":"r1","command":"1","data":"oops"}"#),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn encodes_response_with_wire_names() {
        let response = Response {
            request_id: "r1".to_string(),
            data:       ResponseData {
                command: "3".to_string(),
                output:  "done\n".to_string(),
                status:  Status::Success,
            },
        };

        let value: serde_json::Value =
            serde_json::from_str(&encode_response(&response).unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "requestId": "r1",
                "data": { "command": "3", "output": "done\n", "status": "success" }
            })
        );
    }

    #[test]
    fn failed_status_is_lowercase() {
        assert_eq!(serde_json::to_string(&Status::Failed).unwrap(), r#""failed""#);
    }
}
