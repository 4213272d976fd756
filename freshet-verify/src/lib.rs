//! Freshet Verify - Ownership Verification
//!
//! Proves control of a domain by DNS TXT record, served file or HTML meta
//! tag, retried on a fixed schedule that spans about thirty days. Runs on
//! any [`StepRuntime`] able to retry steps and sleep until a deadline.

pub mod jobs;
pub mod machine;
pub mod methods;
pub mod runtime;
pub mod schedule;
pub mod store;
pub mod telemetry;

pub use jobs::{ResumeJob, ResumeMetrics, ResumeSnapshot};
pub use machine::VerificationMachine;
pub use methods::{
    expected_value, file_body_matches, meta_tags_contain, txt_matches, DnsTxtProbe,
    HttpFileProbe, MetaTagProbe, MethodProbe, VerificationMethod, Verifier,
};
pub use runtime::{StepError, StepRuntime, TokioStepRuntime};
pub use schedule::{
    delay_for, offset_of, CancelReason, VerificationAttempt, VerificationState, MAX_ATTEMPTS,
    RETRY_SCHEDULE,
};
pub use store::{InMemoryVerificationStore, SubjectSnapshot, VerificationStore};
pub use telemetry::{init_tracing, LogFormat};
