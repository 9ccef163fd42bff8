//! Generation sessions: cancellable streaming answers with a citation
//! preamble.
#![cfg_attr(
    test,
    allow(
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        reason = "Test allows"
    )
)]

pub mod answer;
pub mod manager;
/// Citation preamble framing.
pub mod meta;
/// Prompt assembly.
pub mod prompt;

pub use answer::AnswerService;
pub use manager::{ResponseStream, SessionHandle, SessionManager, SessionState};
pub use meta::{Citation, META_DELIMITER, MetaBlock, encode_meta_prefix, split_meta_prefix};
pub use prompt::{SYSTEM_PROMPT, build_request};
