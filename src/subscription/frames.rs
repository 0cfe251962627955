//! Decoding of inbound JSON-RPC frames received on the push channel.
//!
//! Only a well-formed `eth_subscription` push for the active subscription id
//! becomes a [`InboundFrame::NewHead`]; acknowledgements, responses, and
//! foreign pushes are classified so the session can handle them internally.

use crate::model::BlockHeight;
use serde::Deserialize;
use serde_json::Value;

pub(crate) const SUBSCRIBE_METHOD: &str = "eth_subscribe";
pub(crate) const UNSUBSCRIBE_METHOD: &str = "eth_unsubscribe";
pub(crate) const NOTIFICATION_METHOD: &str = "eth_subscription";
pub(crate) const NEW_HEADS_TOPIC: &str = "newHeads";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// New header for the active subscription.
    NewHead {
        height: BlockHeight,
        hash: Option<String>,
    },
    /// Push for the active subscription whose header could not be parsed.
    MalformedHead { reason: String },
    /// Push for a subscription id other than the active one.
    ForeignPush { subscription: String },
    /// Successful response to a request we issued (subscribe ack, unsubscribe).
    Response { id: u64, result: Value },
    /// Error response to a request we issued.
    ErrorResponse { id: Option<u64>, message: String },
    /// Anything that is not JSON-RPC we recognise.
    Unrecognized,
}

#[derive(Deserialize)]
struct RawFrame {
    id: Option<Value>,
    method: Option<String>,
    params: Option<RawParams>,
    result: Option<Value>,
    error: Option<RawError>,
}

#[derive(Deserialize)]
struct RawParams {
    subscription: Option<String>,
    result: Option<Value>,
}

#[derive(Deserialize)]
struct RawError {
    code: Option<i64>,
    message: Option<String>,
}

/// Classifies one text frame. `active_subscription` is the id returned by the
/// subscribe acknowledgement; pushes are only trusted when it matches.
pub fn decode_frame(text: &str, active_subscription: Option<&str>) -> InboundFrame {
    let Ok(frame) = serde_json::from_str::<RawFrame>(text) else {
        return InboundFrame::Unrecognized;
    };

    if let Some(method) = frame.method.as_deref() {
        if method != NOTIFICATION_METHOD {
            return InboundFrame::Unrecognized;
        }
        let Some(params) = frame.params else {
            return InboundFrame::Unrecognized;
        };
        let Some(subscription) = params.subscription else {
            return InboundFrame::Unrecognized;
        };
        if active_subscription != Some(subscription.as_str()) {
            return InboundFrame::ForeignPush { subscription };
        }
        return decode_header(params.result);
    }

    let id = frame.id.as_ref().and_then(Value::as_u64);

    if let Some(error) = frame.error {
        let message = match (error.code, error.message) {
            (Some(code), Some(message)) => format!("{message} (code {code})"),
            (None, Some(message)) => message,
            (Some(code), None) => format!("code {code}"),
            (None, None) => "unknown error".to_string(),
        };
        return InboundFrame::ErrorResponse { id, message };
    }

    match (id, frame.result) {
        (Some(id), Some(result)) => InboundFrame::Response { id, result },
        _ => InboundFrame::Unrecognized,
    }
}

fn decode_header(header: Option<Value>) -> InboundFrame {
    let Some(header) = header else {
        return InboundFrame::MalformedHead {
            reason: "notification carries no header".to_string(),
        };
    };

    let Some(raw_number) = header.get("number").and_then(Value::as_str) else {
        return InboundFrame::MalformedHead {
            reason: "header has no hex number field".to_string(),
        };
    };

    match BlockHeight::parse(raw_number) {
        Ok(height) => InboundFrame::NewHead {
            height,
            hash: header
                .get("hash")
                .and_then(Value::as_str)
                .map(str::to_owned),
        },
        Err(err) => InboundFrame::MalformedHead {
            reason: format!("{err:#}"),
        },
    }
}

/// Builds the `eth_subscribe` request for new headers.
pub(crate) fn subscribe_request(id: u64) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": SUBSCRIBE_METHOD,
        "params": [NEW_HEADS_TOPIC],
    })
    .to_string()
}

pub(crate) fn unsubscribe_request(id: u64, subscription: &str) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": UNSUBSCRIBE_METHOD,
        "params": [subscription],
    })
    .to_string()
}
