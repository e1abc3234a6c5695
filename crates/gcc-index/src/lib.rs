//! Session Index (spec §4.I): SQLite-shaped metadata catalog for session
//! create/rename/branch/merge/delete and command history.
//!
//! Grounded on `original_source/src/intelligence/database.py`
//! (`DatabaseService`, schema, "add column if missing" migrations) and
//! `src/intelligence/registry.py` (`branch_session`/`merge_session`). No
//! teacher crate in the corpus has a database layer; `rusqlite` is adopted
//! per the enrich-from-the-pack rule.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use gcc_collab::SqlIndex;
use gcc_core::{AppError, CommandRecord};
use rusqlite::{params, Connection, OptionalExtension};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    title TEXT,
    goal TEXT,
    status TEXT DEFAULT 'active',
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    path TEXT,
    parent_id TEXT,
    FOREIGN KEY (parent_id) REFERENCES sessions(id)
);

CREATE TABLE IF NOT EXISTS command_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT,
    timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    skill_id TEXT,
    cmd TEXT,
    exit_code INTEGER,
    output_summary TEXT,
    env_os TEXT,
    env_release TEXT,
    env_shell TEXT,
    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_history_session ON command_history(session_id);
CREATE INDEX IF NOT EXISTS idx_history_skill ON command_history(skill_id);
";

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, AppError> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .map_err(map_err)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(map_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(map_err)?;
    Ok(names)
}

fn add_column_if_missing(conn: &Connection, table: &str, column: &str, ddl: &str) -> Result<(), AppError> {
    let columns = table_columns(conn, table)?;
    if !columns.iter().any(|c| c == column) {
        conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {ddl}"), [])
            .map_err(map_err)?;
        tracing::info!(table, column, "session index migrated");
    }
    Ok(())
}

fn migrate(conn: &Connection) -> Result<(), AppError> {
    add_column_if_missing(conn, "sessions", "title", "title TEXT")?;
    add_column_if_missing(conn, "sessions", "parent_id", "parent_id TEXT")?;
    add_column_if_missing(conn, "sessions", "session_type", "session_type TEXT")?;
    add_column_if_missing(conn, "sessions", "metadata", "metadata TEXT")?;
    add_column_if_missing(conn, "command_history", "cwd", "cwd TEXT")?;
    Ok(())
}

fn map_err(err: rusqlite::Error) -> AppError {
    AppError::Fatal(format!("session index: {err}"))
}

/// `get_session_metrics` result (spec §4.I).
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMetrics {
    pub command_count: i64,
    /// Most frequent `(os, shell)` pair across the session's command
    /// history, ties broken by first-seen order (Open Question 3).
    pub os: Option<String>,
    pub shell: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRow {
    pub id: String,
    pub title: Option<String>,
    pub goal: String,
    pub status: String,
    pub path: String,
    pub parent_id: Option<String>,
}

/// SQLite-backed session metadata catalog rooted at `<gcc_base>/intelligence.db`.
pub struct SessionIndex {
    conn: Mutex<Connection>,
}

impl SessionIndex {
    pub fn open(db_path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Fatal(e.to_string()))?;
        }
        let conn = Connection::open(db_path).map_err(map_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(map_err)?;
        conn.execute_batch(SCHEMA).map_err(map_err)?;
        migrate(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn insert_session(
        &self,
        session_id: &str,
        goal: &str,
        path: &Path,
        title: Option<&str>,
        parent_id: Option<&str>,
    ) -> Result<(), AppError> {
        let default_title: String = goal.chars().take(50).collect();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO sessions (id, title, goal, path, parent_id) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session_id,
                title.unwrap_or(&default_title),
                goal,
                path.to_string_lossy(),
                parent_id,
            ],
        )
        .map_err(map_err)?;
        Ok(())
    }

    pub fn rename_session(&self, session_id: &str, new_title: &str) -> Result<(), AppError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE sessions SET title = ?1 WHERE id = ?2",
            params![new_title, session_id],
        )
        .map_err(map_err)?;
        Ok(())
    }

    pub fn delete_session(&self, session_id: &str) -> Result<(), AppError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])
            .map_err(map_err)?;
        Ok(())
    }

    pub fn log_command(&self, record: &CommandRecord) -> Result<(), AppError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO command_history
             (session_id, timestamp, skill_id, cmd, exit_code, output_summary, env_os, env_release, env_shell, cwd)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.session_id,
                record.timestamp.to_rfc3339(),
                record.skill_tag,
                record.command,
                record.exit_code,
                record.output_truncated,
                record.env_os,
                record.env_release,
                record.env_shell,
                record.env_cwd,
            ],
        )
        .map_err(map_err)?;
        Ok(())
    }

    /// `get_session_metrics(id) -> {commandCount, os, shell}` (spec §4.I).
    /// Resolves Open Question 3: counts summed, `(os, shell)` the most
    /// frequent pair, ties broken by first-seen order.
    pub fn get_session_metrics(&self, session_id: &str) -> Result<SessionMetrics, AppError> {
        let conn = self.conn.lock().unwrap();
        let command_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM command_history WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .map_err(map_err)?;

        let mut stmt = conn
            .prepare(
                "SELECT env_os, env_shell, COUNT(*) as n, MIN(id) as first_seen
                 FROM command_history WHERE session_id = ?1
                 GROUP BY env_os, env_shell
                 ORDER BY n DESC, first_seen ASC
                 LIMIT 1",
            )
            .map_err(map_err)?;

        let pair = stmt
            .query_row(params![session_id], |row| {
                Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?))
            })
            .optional()
            .map_err(map_err)?;

        let (os, shell) = pair.unwrap_or((None, None));
        Ok(SessionMetrics { command_count, os, shell })
    }

    pub fn list_sessions(&self, query: Option<&str>) -> Result<Vec<SessionRow>, AppError> {
        let conn = self.conn.lock().unwrap();
        let mut rows = Vec::new();
        if let Some(query) = query {
            let like = format!("%{query}%");
            let mut stmt = conn
                .prepare("SELECT id, title, goal, status, path, parent_id FROM sessions WHERE title LIKE ?1 OR goal LIKE ?1")
                .map_err(map_err)?;
            let mapped = stmt
                .query_map(params![like], Self::row_to_session)
                .map_err(map_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(map_err)?;
            rows.extend(mapped);
        } else {
            let mut stmt = conn
                .prepare("SELECT id, title, goal, status, path, parent_id FROM sessions LIMIT 10")
                .map_err(map_err)?;
            let mapped = stmt
                .query_map([], Self::row_to_session)
                .map_err(map_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(map_err)?;
            rows.extend(mapped);
        }
        Ok(rows)
    }

    fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<SessionRow> {
        Ok(SessionRow {
            id: row.get(0)?,
            title: row.get(1)?,
            goal: row.get(2)?,
            status: row.get(3)?,
            path: row.get(4)?,
            parent_id: row.get(5)?,
        })
    }

    /// Purge all session and history data (spec §4.I `reset_all`).
    pub fn reset_all(&self) -> Result<(), AppError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM command_history", []).map_err(map_err)?;
        conn.execute("DELETE FROM sessions", []).map_err(map_err)?;
        Ok(())
    }

    /// Fork `parent_id`'s on-disk root into a new session and append a
    /// BRANCH marker to its log (spec §4.I). Returns the new session id.
    pub fn branch_session(&self, parent_id: &str, branch_name: &str) -> Result<String, AppError> {
        let (parent_path, parent_goal) = {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                "SELECT path, goal FROM sessions WHERE id = ?1",
                params![parent_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .map_err(|_| AppError::SessionNotFound(parent_id.to_string()))?
        };

        let safe_name: String = branch_name
            .to_lowercase()
            .replace(' ', "-")
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        let branch_id = format!("branch_{safe_name}_{}", Utc::now().format("%Y%m%d_%H%M%S"));

        let parent_path = PathBuf::from(&parent_path);
        let branch_path = parent_path
            .parent()
            .map(|p| p.join(&branch_id))
            .ok_or_else(|| AppError::Fatal("parent session has no parent directory".into()))?;

        if parent_path.exists() {
            copy_dir_recursive(&parent_path, &branch_path).map_err(|e| AppError::Fatal(e.to_string()))?;
            let marker = format!(
                "\n\n## BRANCH FORKED: {}\nForked from {parent_id}\n",
                Utc::now().format("%Y-%m-%d %H:%M:%S")
            );
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(branch_path.join("log.md"))
                .and_then(|mut f| {
                    use std::io::Write;
                    f.write_all(marker.as_bytes())
                })
                .map_err(|e| AppError::Fatal(e.to_string()))?;
        }

        self.insert_session(
            &branch_id,
            &format!("Branch for: {parent_goal}"),
            &branch_path,
            Some(branch_name),
            Some(parent_id),
        )?;
        tracing::info!(parent_id, branch_id, "session branched");
        Ok(branch_id)
    }

    /// Append the branch's commit journal to its parent's log and mark the
    /// branch `merged` (spec §4.I). Neither operation rewrites prior content.
    pub fn merge_session(&self, branch_id: &str) -> Result<(), AppError> {
        let (parent_id, branch_path, branch_title) = {
            let conn = self.conn.lock().unwrap();
            let (parent_id, branch_path, branch_title): (Option<String>, String, Option<String>) = conn
                .query_row(
                    "SELECT parent_id, path, title FROM sessions WHERE id = ?1",
                    params![branch_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .map_err(|_| AppError::SessionNotFound(branch_id.to_string()))?;
            let parent_id = parent_id.ok_or_else(|| {
                AppError::Fatal(format!("session {branch_id} is not a branch"))
            })?;
            (parent_id, branch_path, branch_title)
        };

        let parent_path: String = {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                "SELECT path FROM sessions WHERE id = ?1",
                params![&parent_id],
                |row| row.get(0),
            )
            .map_err(|_| AppError::SessionNotFound(parent_id.clone()))?
        };

        let branch_commit_path = PathBuf::from(&branch_path).join("commit.md");
        if branch_commit_path.exists() {
            let findings = std::fs::read_to_string(&branch_commit_path)
                .map_err(|e| AppError::Fatal(e.to_string()))?;
            let header = format!(
                "\n\n## MERGED FROM BRANCH: {} ({branch_id})\n",
                branch_title.unwrap_or_default()
            );
            use std::io::Write;
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(PathBuf::from(&parent_path).join("log.md"))
                .and_then(|mut f| f.write_all(header.as_bytes()).and_then(|_| f.write_all(findings.as_bytes())))
                .map_err(|e| AppError::Fatal(e.to_string()))?;
        }

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE sessions SET status = 'merged' WHERE id = ?1",
            params![branch_id],
        )
        .map_err(map_err)?;
        tracing::info!(branch_id, parent_id, "session merged");
        Ok(())
    }
}

fn json_to_sql(value: &serde_json::Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as SqlValue;
    match value {
        serde_json::Value::Null => SqlValue::Null,
        serde_json::Value::Bool(b) => SqlValue::Integer(*b as i64),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| n.as_f64().map(SqlValue::Real))
            .unwrap_or(SqlValue::Null),
        serde_json::Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn sql_to_json(value: rusqlite::types::ValueRef) -> serde_json::Value {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::json!(i),
        ValueRef::Real(f) => serde_json::json!(f),
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => serde_json::Value::Null,
    }
}

/// Implements the generic `SqlIndex` wire contract (spec §6) over the same
/// connection `SessionIndex`'s typed methods use; no dedicated async
/// runtime is needed since `rusqlite` calls here never cross an `.await`.
#[async_trait]
impl SqlIndex for SessionIndex {
    async fn execute(&self, sql: &str, params: &[serde_json::Value]) -> Result<u64, AppError> {
        let conn = self.conn.lock().unwrap();
        let sql_params: Vec<rusqlite::types::Value> = params.iter().map(json_to_sql).collect();
        let changed = conn
            .execute(sql, rusqlite::params_from_iter(sql_params))
            .map_err(map_err)?;
        Ok(changed as u64)
    }

    async fn query(
        &self,
        sql: &str,
        params: &[serde_json::Value],
    ) -> Result<Vec<serde_json::Map<String, serde_json::Value>>, AppError> {
        let conn = self.conn.lock().unwrap();
        let sql_params: Vec<rusqlite::types::Value> = params.iter().map(json_to_sql).collect();
        let mut stmt = conn.prepare(sql).map_err(map_err)?;
        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        let rows = stmt
            .query_map(rusqlite::params_from_iter(sql_params), |row| {
                let mut map = serde_json::Map::new();
                for (i, name) in column_names.iter().enumerate() {
                    map.insert(name.clone(), sql_to_json(row.get_ref(i)?));
                }
                Ok(map)
            })
            .map_err(map_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_err)?;
        Ok(rows)
    }

    fn schema(&self) -> Vec<String> {
        vec!["sessions".to_string(), "command_history".to_string()]
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
