//! The reactive half of the runtime (§4.3–§4.5): drains the job queue,
//! runs the classify/execute state machine, brokers the approval
//! protocol, and processes media artifacts in the background. Proactive
//! scheduling and the task/goal executor live in `warden-orchestrator`.

pub mod approval;
pub mod blob;
pub mod config;
pub mod context;
pub mod json_extract;
pub mod media;
pub mod reactive;

pub use approval::{ApprovalWaiter, WaitOutcome};
pub use blob::{BlobStore, LocalFsBlobStore};
pub use config::CoreConfig;
pub use context::build_window;
pub use json_extract::extract_first_json_object;
pub use media::{
    artifact_summary, ImageAnalysisBackend, MediaBackend, MediaBackends, MediaProcessor, OcrBackend,
    VoiceTranscriptionBackend,
};
pub use reactive::{Classification, Intent, ReactiveWorker};
