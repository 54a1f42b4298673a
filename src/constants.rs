//! # System Constants
//!
//! Wire-level constants shared with the external stage workers and the
//! surrounding CRUD layer. Numeric codes are persisted and sent over the wire,
//! so they must never be renumbered.

pub use crate::state_machine::{ItemStep, StageAction, TaskStatus};

/// Queue names, one per stage, plus the dead-letter plumbing
pub mod queues {
    pub const VOICE_EXTRACT: &str = "voice_extract_queue";
    pub const AUDIO_CLEAR: &str = "audio_clear_queue";
    pub const FAST_PROCESS: &str = "fast_process_queue";
    pub const TRANSCRIBE: &str = "transcribe_queue";

    pub const DEFAULT_EXCHANGE: &str = "task";
    pub const DEAD_LETTER_ROUTING_KEY: &str = "dead_letter";

    /// Exchange used for direct-to-queue publishing (routing key == queue name)
    pub const DEFAULT_PUBLISH_EXCHANGE: &str = "amq.default";

    /// Dead-letter exchange name derived from the main exchange
    pub fn dead_letter_exchange(exchange: &str) -> String {
        format!("{exchange}_dlx")
    }

    /// Dead-letter queue name derived from the main exchange
    pub fn dead_letter_queue(exchange: &str) -> String {
        format!("{exchange}_dead_letter_queue")
    }
}

/// Routing keys binding each stage queue to the main exchange
pub mod routing_keys {
    pub const EXTRACT: &str = "audio.extract";
    pub const CLEAR: &str = "audio.clear";
    pub const FAST: &str = "audio.fast";
    pub const TRANSCRIBE: &str = "audio.transcribe";
}

/// Broker-side defaults carried over from the production deployment
pub mod broker_defaults {
    /// One hour
    pub const MESSAGE_TTL_MS: u64 = 3_600_000;
    pub const MAX_PRIORITY: u8 = 10;
    pub const DEFAULT_PRIORITY: u8 = 0;
    pub const HTTP_PORT: u16 = 15672;
    pub const HTTP_TIMEOUT_SECONDS: u64 = 30;
    pub const VHOST: &str = "/";
}

/// Placeholder persisted when a transcript payload cannot be serialized
pub const TRANSCRIPT_PLACEHOLDER: &str = "[transcript unavailable: serialization failed]";
