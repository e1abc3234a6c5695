//! Session creation and id/prefix resolution for `continue-session`.
//!
//! Prefix-matching grounded on `csa-session::validate::resolve_session_prefix`
//! (case-insensitive prefix scan over a directory of session ids, erroring on
//! zero or multiple matches).

use std::path::{Path, PathBuf};

use gcc_core::{AppError, Session};

pub fn new_session_id(goal: &str) -> String {
    let slug: String = goal
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug: String = slug.split('-').filter(|s| !s.is_empty()).take(5).collect::<Vec<_>>().join("-");
    format!(
        "session_{}_{}_{}",
        chrono::Utc::now().format("%Y%m%d_%H%M%S"),
        ulid::Ulid::new(),
        slug
    )
}

/// Resolve a (possibly partial, possibly absent) session id against the
/// on-disk `sessions/` directory: an absent id resolves to the
/// lexicographically latest (ids are time-prefixed, so this is also the
/// most recent); a present id is matched as a case-insensitive prefix.
pub fn resolve_session(sessions_dir: &Path, id: Option<&str>) -> Result<String, AppError> {
    let mut entries: Vec<String> = std::fs::read_dir(sessions_dir)
        .map_err(|_| AppError::SessionNotFound("no sessions directory".to_string()))?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    entries.sort();

    let Some(prefix) = id else {
        return entries.pop().ok_or_else(|| AppError::SessionNotFound("no sessions exist yet".to_string()));
    };

    let matches: Vec<&String> = entries
        .iter()
        .filter(|name| name.to_uppercase().starts_with(&prefix.to_uppercase()))
        .collect();

    match matches.len() {
        0 => Err(AppError::SessionNotFound(prefix.to_string())),
        1 => Ok(matches[0].clone()),
        _ => Err(AppError::AmbiguousSessionPrefix(prefix.to_string())),
    }
}

pub fn load_session(sessions_dir: &Path, id: &str) -> Result<Session, AppError> {
    let root = sessions_dir.join(id);
    let metadata_path = root.join("metadata.toml");
    let text = std::fs::read_to_string(&metadata_path)
        .map_err(|_| AppError::SessionNotFound(id.to_string()))?;
    toml::from_str(&text).map_err(|e| AppError::Fatal(format!("corrupt session metadata: {e}")))
}

pub fn save_session(session: &Session) -> Result<(), AppError> {
    std::fs::create_dir_all(&session.root).map_err(|e| AppError::Fatal(e.to_string()))?;
    let text = toml::to_string(session).map_err(|e| AppError::Fatal(e.to_string()))?;
    std::fs::write(session.metadata_path(), text).map_err(|e| AppError::Fatal(e.to_string()))
}

pub fn sessions_dir(gcc_base_path: &str) -> PathBuf {
    Path::new(gcc_base_path).join("sessions")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn new_session_id_is_slugified_and_unique() {
        let a = new_session_id("Restart the prod pod!!");
        let b = new_session_id("Restart the prod pod!!");
        assert!(a.contains("restart-the-prod-pod"));
        assert_ne!(a, b);
    }

    #[test]
    fn resolve_session_with_no_id_picks_the_latest() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("session_20260101_000000_a")).unwrap();
        std::fs::create_dir_all(dir.path().join("session_20260102_000000_b")).unwrap();
        assert_eq!(resolve_session(dir.path(), None).unwrap(), "session_20260102_000000_b");
    }

    #[test]
    fn resolve_session_matches_case_insensitive_prefix() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("session_20260101_000000_abc")).unwrap();
        assert_eq!(
            resolve_session(dir.path(), Some("SESSION_20260101")).unwrap(),
            "session_20260101_000000_abc"
        );
    }

    #[test]
    fn resolve_session_errors_on_ambiguous_prefix() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("session_1_a")).unwrap();
        std::fs::create_dir_all(dir.path().join("session_1_b")).unwrap();
        assert!(matches!(
            resolve_session(dir.path(), Some("session_1")),
            Err(AppError::AmbiguousSessionPrefix(_))
        ));
    }

    #[test]
    fn resolve_session_errors_when_nothing_matches() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path()).unwrap();
        assert!(matches!(
            resolve_session(dir.path(), Some("nope")),
            Err(AppError::SessionNotFound(_))
        ));
    }
}
