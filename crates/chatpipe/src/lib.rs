//! Public facade crate for `chatpipe`.
//!
//! Re-exports the backend-agnostic types/traits from `chatpipe-core` and the entry points
//! of the local pipeline: [`Augmenter`] for `@s` augmentation and [`ChatService`] for
//! full chat turns.

pub use chatpipe_core::*;

pub use chatpipe_local::chat::{
    ChatRequest, ChatService, ContinueRequest, ReplyStream, DEFAULT_MODEL, DEFAULT_SYSTEM_TEXT,
    MISSING_CREDENTIALS,
};
pub use chatpipe_local::openai_compat::{ChatClient, GenerationParams};
pub use chatpipe_local::settings::{Settings, SettingsStore};
pub use chatpipe_local::{Augmenter, LocalFetcher, PipelineConfig};
