//! Decoding of GraphQL response envelopes shared by the HTTP and WebSocket paths.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{server_error, Error, ServerErrorKind};

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<Value>>,
}

/// Extracts `data` from a `{data, errors}` envelope.
///
/// Any entry in `errors` fails the whole response, even when partial data came back.
pub(crate) fn into_data(payload: Value) -> Result<Value, Error> {
    let envelope: Envelope = serde_json::from_value(payload)?;

    if let Some(errors) = envelope.errors.filter(|errors| !errors.is_empty()) {
        return Err(server_error(
            ServerErrorKind::GraphQl,
            &error_messages(&Value::Array(errors)),
        ));
    }

    match envelope.data {
        Some(Value::Null) | None => Err(server_error(
            ServerErrorKind::MissingData,
            "response carried neither data nor errors",
        )),
        Some(data) => Ok(data),
    }
}

/// Joins the `message` of every error in an error payload.
///
/// Servers send a single object or a list depending on the protocol flavour.
pub(crate) fn error_messages(payload: &Value) -> String {
    let message = |error: &Value| {
        error["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string())
    };

    match payload {
        Value::Array(errors) => errors.iter().map(message).collect::<Vec<_>>().join("; "),
        other => message(other),
    }
}
