// State machine module for the media pipeline
//
// Items move through extract, clear, fast recognition and transcription.
// The step table lives in `transitions`, completion bookkeeping in `progress`
// and dispatch preconditions in `guards`. Nothing here touches storage.

pub mod errors;
pub mod events;
pub mod guards;
pub mod progress;
pub mod states;
pub mod transitions;

// Re-export main types for convenient access
pub use errors::{GuardError, GuardResult, StateMachineError, StateMachineResult};
pub use events::{CallbackOutcome, StageAction};
pub use guards::{can_start_from, check_dispatch, gating_step, GuardOptions};
pub use progress::{ItemState, StageProgress, TranscriptQuality};
pub use states::{ItemStep, TaskStatus};
pub use transitions::{success_target, StageRule, FAILURE_TARGET};
