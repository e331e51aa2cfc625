//! Wire messages
//!
//! Every frame is one JSON object on its own line. Requests carry an
//! `action`, replies carry a `status`, and pushes (see
//! [`Push`](crate::broker::Push)) carry `"type": "message"`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::error::ProtocolError;

/// A validated client request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Request {
    Publish { topic: String, message: Value },
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Get { topic: String },
}

/// A request as it arrives, before the action and topic are checked.
///
/// `action` is kept as any JSON value so that `{"action": 5}` is answered as
/// an unknown action rather than as malformed input.
#[derive(Debug, Deserialize)]
pub struct RawRequest {
    pub action: Option<Value>,
    pub topic: Option<String>,
    #[serde(default)]
    pub message: Value,
}

impl TryFrom<RawRequest> for Request {
    type Error = ProtocolError;

    fn try_from(raw: RawRequest) -> Result<Self, Self::Error> {
        let action = match raw.action {
            Some(Value::String(action)) => action,
            Some(Value::Null) | None => "null".to_string(),
            Some(other) => other.to_string(),
        };

        let build: fn(String, Value) -> Request = match action.as_str() {
            "publish" => |topic, message| Request::Publish { topic, message },
            "subscribe" => |topic, _| Request::Subscribe { topic },
            "unsubscribe" => |topic, _| Request::Unsubscribe { topic },
            "get" => |topic, _| Request::Get { topic },
            _ => return Err(ProtocolError::UnknownAction(action)),
        };

        let topic = raw
            .topic
            .filter(|t| !t.is_empty())
            .ok_or(ProtocolError::MissingTopic)?;

        Ok(build(topic, raw.message))
    }
}

impl Request {
    pub fn topic(&self) -> &str {
        match self {
            Request::Publish { topic, .. }
            | Request::Subscribe { topic }
            | Request::Unsubscribe { topic }
            | Request::Get { topic } => topic,
        }
    }
}

/// Decode one inbound line into a request.
pub fn decode_request(line: &str) -> Result<Request, ProtocolError> {
    let raw: RawRequest =
        serde_json::from_str(line).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
    raw.try_into()
}

/// The single correlated reply to a request.
///
/// `Disconnected` never crosses the wire: the client synthesizes it when its
/// connection goes away so a waiting caller is always released.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Reply {
    Published {
        topic: String,
    },
    Subscribed {
        topic: String,
    },
    Unsubscribed {
        topic: String,
    },
    Ok {
        topic: String,
        #[serde(default)]
        data: Value,
    },
    Error {
        message: String,
    },
    Disconnected,
}

impl From<ProtocolError> for Reply {
    fn from(err: ProtocolError) -> Self {
        Reply::Error {
            message: err.to_string(),
        }
    }
}
