use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope for an event, containing stream metadata.
///
/// Notes:
/// - A stream is identified by `stream_id` (e.g. a product's stock ledger).
/// - **Append-only**: `sequence_number` is monotonically increasing per stream, starting at 1.
/// - `payload` is the domain event (typed or raw JSON).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,

    stream_id: Uuid,
    stream_type: String,

    /// Monotonically increasing position in the stream.
    sequence_number: u64,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        stream_id: Uuid,
        stream_type: impl Into<String>,
        sequence_number: u64,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            stream_id,
            stream_type: stream_type.into(),
            sequence_number,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn stream_id(&self) -> Uuid {
        self.stream_id
    }

    pub fn stream_type(&self) -> &str {
        &self.stream_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }

    /// Replace the payload, keeping the stream metadata (e.g. when decoding raw JSON).
    pub fn try_map_payload<F, T, Err>(self, f: F) -> Result<EventEnvelope<T>, Err>
    where
        F: FnOnce(E) -> Result<T, Err>,
    {
        Ok(EventEnvelope {
            event_id: self.event_id,
            stream_id: self.stream_id,
            stream_type: self.stream_type,
            sequence_number: self.sequence_number,
            payload: f(self.payload)?,
        })
    }
}
