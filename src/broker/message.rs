//! Push frame
//!
//! `Push` is the unsolicited server-to-client frame used both for live
//! fan-out and for backlog replay on subscribe. On the wire it carries a
//! `"type": "message"` marker, which is how the client tells it apart from a
//! reply:
//!
//! ```json
//! {"type": "message", "topic": "news", "data": {"id": 1}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "message")]
pub struct Push {
    pub topic: String,
    #[serde(default)]
    pub data: Value,
}

impl Push {
    pub fn new(topic: &str, data: Value) -> Self {
        Self {
            topic: topic.to_string(),
            data,
        }
    }
}
