// ============================================================================
// Actors Module
// ============================================================================
//
// Infrastructure actors. Order handling itself is plain async code driven by
// the consumer; actors own side channels such as dead-letter publishing.
//
// ============================================================================

mod dlq;

pub use dlq::{AddToDlq, DeadLetter, DlqActor, StopDlq};

#[cfg(test)]
pub(crate) use dlq::tests::RecordingPublisher;
