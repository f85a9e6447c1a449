//! Domain events and the envelope they are published in.

pub mod envelope;
pub mod event;

pub use envelope::EventEnvelope;
pub use event::Event;
