use serde::{Deserialize, Deserializer, Serialize};

/// Opaque token proving ownership of a received message. Required to delete it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptHandle(pub String);

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message as handed out by the queue backend.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub body: String,
    pub receipt: ReceiptHandle,
    /// Number of times this message has been received, including this one.
    pub receive_count: u64,
}

/// Producer-supplied job body.
///
/// Parsing never fails: absent, null or non-scalar fields become empty strings,
/// numeric fields are stringified.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    #[serde(rename = "photo_path", default, deserialize_with = "lenient_string")]
    pub image_path: String,

    #[serde(default, deserialize_with = "lenient_string")]
    pub chat_id: String,
}

impl JobPayload {
    pub fn parse(body: &str) -> Self {
        match serde_json::from_str(body) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Unparsable job body, using empty payload");
                Self::default()
            }
        }
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

/// One unit of work: an image to run detection on.
#[derive(Debug, Clone)]
pub struct Job {
    /// Queue-assigned message id, stable across redeliveries. Doubles as the prediction id.
    pub id: String,
    pub payload: JobPayload,
    pub receipt: ReceiptHandle,
    pub receive_count: u64,
}

impl Job {
    pub fn from_message(message: ReceivedMessage) -> Self {
        let payload = JobPayload::parse(&message.body);
        Self {
            id: message.message_id,
            payload,
            receipt: message.receipt,
            receive_count: message.receive_count,
        }
    }
}
