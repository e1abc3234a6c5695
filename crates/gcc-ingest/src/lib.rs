//! Ingestor (spec §4.E): parses the append-only log back into a typed
//! message stream with offsets. Grounded on
//! `original_source/src/gcc/ingestor.py`'s `parse_log`/section-split regex.

use std::path::Path;
use std::sync::OnceLock;

use gcc_core::Message;
use regex::Regex;

fn section_splitter() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n(?=## \[\d{2}:\d{2}\])").unwrap())
}

fn header_matcher() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)^## \[(\d{2}:\d{2})\]\s+(AI|Human):\s*(.*)").unwrap())
}

/// Parse `log.md` into a typed message stream, skipping the first
/// `start_offset` top-level sections (spec §4.E).
///
/// Section counting, not byte offset, makes this safe to re-run after a
/// redaction/truncation replay rewrites earlier bytes without changing the
/// section count.
///
/// Tool outputs ingested from disk surface as AI text: their live tool-call
/// identity is lost once written to the log, so this never invents
/// `ToolCall`s.
pub fn parse_log(path: &Path, start_offset: usize) -> Vec<Message> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };

    let sections: Vec<&str> = section_splitter().split(&content).collect();
    let effective = if start_offset < sections.len() {
        &sections[start_offset..]
    } else {
        &[]
    };

    let mut messages = Vec::new();
    for section in effective {
        let section = section.trim();
        if section.is_empty() {
            continue;
        }

        let Some(captures) = header_matcher().captures(section) else {
            continue;
        };

        let timestamp = &captures[1];
        let role = &captures[2];
        let body = captures[3].trim();

        let content = format!("[{timestamp}] {body}");
        match role {
            "AI" => messages.push(Message::ai(content, vec![])),
            "Human" => messages.push(Message::human(content)),
            _ => unreachable!("header_matcher only captures AI|Human"),
        }
    }
    messages
}

/// Returns only the entries not yet processed (spec §4.E), by delegating
/// the offset directly to [`parse_log`] rather than re-parsing the head.
pub fn get_new_entries(path: &Path, processed_count: usize) -> Vec<Message> {
    parse_log(path, processed_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn sample_log() -> String {
        "\n## [09:00] Human: echo hi\n**OUTPUT:**\n```bash\nhi\n```\n\n---\n\
         \n## [09:01] AI: ran ls\n**OBSERVATION:** N/A\n\n**THOUGHT:** N/A\n\n**OUTPUT:**\n```bash\nfile1\n```\n\n**INFERENCE:** N/A\n\n---\n"
            .to_string()
    }

    #[test]
    fn parses_human_and_ai_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.md");
        fs::write(&path, sample_log()).unwrap();

        let messages = parse_log(&path, 0);
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0], Message::Human { .. }));
        assert!(matches!(messages[1], Message::Ai { .. }));
    }

    #[test]
    fn missing_file_returns_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nonexistent.md");
        assert!(parse_log(&path, 0).is_empty());
    }

    #[test]
    fn start_offset_skips_processed_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.md");
        fs::write(&path, sample_log()).unwrap();

        let messages = parse_log(&path, 1);
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], Message::Ai { .. }));
    }

    #[test]
    fn offset_past_end_returns_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.md");
        fs::write(&path, sample_log()).unwrap();
        assert!(parse_log(&path, 100).is_empty());
    }

    #[test]
    fn ingested_ai_text_carries_no_tool_calls() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.md");
        fs::write(&path, sample_log()).unwrap();

        let messages = parse_log(&path, 0);
        let ai = messages.iter().find(|m| m.is_ai()).unwrap();
        assert!(ai.tool_calls().is_empty());
    }

    #[test]
    fn get_new_entries_matches_parse_log_with_offset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.md");
        fs::write(&path, sample_log()).unwrap();
        assert_eq!(get_new_entries(&path, 1).len(), parse_log(&path, 1).len());
    }
}
