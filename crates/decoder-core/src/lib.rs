//! The decoder-stack runtime (§4.4–§4.5): configured `Decoder`
//! frames, the `DecoderStack` aggregate that drives the external
//! decoder engine over a worker thread, row routing, progress
//! reporting, and cooperative cancellation.

mod decoder;
mod row_store;
mod stack;

pub use decoder::{AnnotationRowDesc, Decoder};
pub use stack::{DecodeError, DecodeState, DecoderStack, StackSignal, TaskStatus};
