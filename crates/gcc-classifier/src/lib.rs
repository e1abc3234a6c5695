//! Safety Classifier: maps a command string to `{auto, approval,
//! destructive}` using per-skill glob rules (spec §4.A).

pub mod load;

use gcc_core::{Skill, Tier};

const TIER_PRECEDENCE: [Tier; 3] = [Tier::Destructive, Tier::Approval, Tier::Auto];

/// Whether `pattern` matches `command` under the spec §4.A matching rules:
/// 1. exact equality; 2. shell-style glob on the full command; 3. a
/// trailing-wildcard pattern's base is a prefix of the command.
fn pattern_matches(pattern: &str, command: &str) -> bool {
    if pattern == command {
        return true;
    }
    if let Ok(glob_pattern) = glob::Pattern::new(pattern) {
        if glob_pattern.matches(command) {
            return true;
        }
    }
    if let Some(base) = pattern.strip_suffix('*') {
        let base = base.trim_end();
        if !base.is_empty() && command.starts_with(base) {
            return true;
        }
    }
    false
}

/// Anti-hallucination guard (spec §4.A): after a textual match, the first
/// whitespace-delimited token of the command must equal the first token of
/// the pattern, unless that pattern token is `*`.
fn passes_anti_hallucination(pattern: &str, command: &str) -> bool {
    let pattern_first = pattern.split_whitespace().next().unwrap_or("");
    if pattern_first == "*" {
        return true;
    }
    let command_first = command.split_whitespace().next().unwrap_or("");
    pattern_first == command_first
}

/// Classify a command against a set of skills.
///
/// Evaluated destructive → approval → auto across *all* skills (so a
/// command matching both a destructive pattern in one skill and an auto
/// pattern in another still classifies destructive, per spec §8 property 1).
/// Within a tier, skills and patterns are checked in the given order and the
/// first match (after the anti-hallucination guard) wins. Default when
/// nothing matches, or the command is empty: `(approval, none)`.
pub fn classify(skills: &[Skill], command: &str) -> (Tier, Option<String>) {
    if command.is_empty() {
        return (Tier::Approval, None);
    }

    for tier in TIER_PRECEDENCE {
        for skill in skills {
            for pattern in skill.patterns_for(tier) {
                if pattern_matches(pattern, command) && passes_anti_hallucination(pattern, command) {
                    return (tier, Some(pattern.clone()));
                }
            }
        }
    }

    (Tier::Approval, None)
}
