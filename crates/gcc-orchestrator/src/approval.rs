//! Approval interrupt (spec §4.H): an externally driven prompt responder
//! plus word-boundary-aware approval/denial token parsing.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

/// Asks the human a single-line question and returns their raw reply.
/// Implemented by the CLI layer over stdin; test doubles can script replies.
#[async_trait]
pub trait ApprovalPrompt: Send {
    async fn ask(&mut self, prompt: &str) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Deny(String),
}

fn approve_tokens() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(y|yes|sure|go|approve|ok)\b").unwrap())
}

fn deny_tokens() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(n|no|stop|don't|cancel|deny)\b").unwrap())
}

/// Parse a human's reply to an approval prompt (spec §4.H). Free text
/// carrying neither token set is treated as denial with the feedback
/// verbatim; a reply matching both sets denies (declining wins on conflict).
pub fn parse_decision(input: &str) -> Decision {
    if approve_tokens().is_match(input) && !deny_tokens().is_match(input) {
        Decision::Approve
    } else {
        Decision::Deny(input.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_yes_approves() {
        assert_eq!(parse_decision("yes"), Decision::Approve);
        assert_eq!(parse_decision("y"), Decision::Approve);
        assert_eq!(parse_decision("go ahead"), Decision::Approve);
    }

    #[test]
    fn plain_no_denies_with_text() {
        assert_eq!(
            parse_decision("no, try listing first"),
            Decision::Deny("no, try listing first".to_string())
        );
    }

    #[test]
    fn free_text_with_no_tokens_denies_verbatim() {
        assert_eq!(
            parse_decision("what does that do"),
            Decision::Deny("what does that do".to_string())
        );
    }

    #[test]
    fn conflicting_tokens_deny() {
        assert_eq!(
            parse_decision("no don't, although yes I considered it"),
            Decision::Deny("no don't, although yes I considered it".to_string())
        );
    }

    #[test]
    fn word_boundary_rejects_substring_matches() {
        // "nonstop" must not match the "no"/"stop" tokens as substrings.
        assert_eq!(
            parse_decision("nonstop yesterday"),
            Decision::Deny("nonstop yesterday".to_string())
        );
    }
}
