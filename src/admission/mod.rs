//! Message admission: the bounded queue, per-sender state, the ordered rule
//! chain and the pipeline that turns a verdict into at most one reply.

pub mod janitor;
pub mod pipeline;
pub mod policy;
pub mod queue;
pub mod rate_limit;
pub mod replies;
pub mod spam;
pub mod state;

pub use janitor::{Janitor, ReclaimReport};
pub use pipeline::{AdmissionPipeline, GenerationSettings};
pub use policy::{AdmissionPolicy, Rule, Verdict};
pub use queue::{AdmissionQueue, EnqueueAction, MessageProcessor, QueueStats, SubmitOutcome};
pub use spam::SpamDetector;
pub use state::{PauseReason, SenderStateStore};
