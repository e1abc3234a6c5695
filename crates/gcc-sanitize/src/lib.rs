//! Two pure string→string functions applied at distinct boundaries (spec §4.F):
//! [`redact::redact_event`]/[`redact::redact_plain_text`] before anything
//! persists or reaches the LLM collaborator, and [`sanitize::sanitize`] on
//! every tool output before it becomes a Tool message.

pub mod redact;
pub mod sanitize;

pub use redact::{redact_event, redact_plain_text};
pub use sanitize::sanitize;
