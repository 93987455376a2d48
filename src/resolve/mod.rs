//! Record resolution
//!
//! Turns "the newest address the index holds for a key" into the value of the newest record
//! for that key, walking previous-address links across device reads.
//!
//! ```text
//! Issued -> AwaitingPrimary -+-> ResolvingObjectPayload -+-> Delivered
//!                            |                          |
//!                            +-> ChainWalk --(reissue)--+-> Exhausted
//! ```
//!
//! Admission is bounded by a global in-flight counter. A chain hop or a reread keeps the
//! slot of the read it replaces, so completion threads never wait for admission.

mod outcome;
mod pipeline;
mod trampoline;

pub use outcome::{Completion, CompletionSink, ReadOutcome, ReadPhase};
pub use pipeline::{
    PipelineConfig, ResolutionPipeline, DEFAULT_MAX_OUTSTANDING_READS, DEFAULT_READ_SIZE_HINT,
};
