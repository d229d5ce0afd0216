// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use asimi_core::SessionSnapshot;
use asimi_model::{sanitize::sanitize_history, Message, Role};

/// One row of the session listing, decorated for display.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub first_prompt: String,
    pub provider: String,
    pub model: String,
    pub message_count: usize,
}

/// SQLite-backed session store.  Project/branch scoping is by column, not
/// by directory; the whole store is one database file.
pub struct SessionStore {
    conn: Mutex<Connection>,
    writes: AtomicU64,
}

impl SessionStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening database {}", path.display()))?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                id            TEXT PRIMARY KEY,
                created_at    TEXT NOT NULL,
                last_updated  TEXT NOT NULL,
                first_prompt  TEXT NOT NULL,
                provider      TEXT NOT NULL,
                model         TEXT NOT NULL,
                working_dir   TEXT NOT NULL,
                project_slug  TEXT NOT NULL,
                branch_slug   TEXT NOT NULL,
                message_count INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_scope
                ON sessions(project_slug, branch_slug, last_updated);
            CREATE TABLE IF NOT EXISTS messages (
                session_id   TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                sequence_no  INTEGER NOT NULL,
                role         TEXT NOT NULL,
                content_json TEXT NOT NULL,
                PRIMARY KEY (session_id, sequence_no)
            );
            CREATE TABLE IF NOT EXISTS prompt_history (
                project_slug TEXT NOT NULL,
                branch_slug  TEXT NOT NULL,
                prompt       TEXT NOT NULL,
                used_at      TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_prompt_history_scope
                ON prompt_history(project_slug, branch_slug, used_at);",
        )?;
        Ok(Self { conn: Mutex::new(conn), writes: AtomicU64::new(0) })
    }

    /// Number of session writes performed; used by the coalescing tests and
    /// the status display.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Persist one snapshot transactionally, replacing any previous state
    /// for the same id.
    ///
    /// The history is sanitized first; a session that holds only its system
    /// message after sanitization is silently dropped.
    pub fn save_snapshot(&self, snapshot: &SessionSnapshot) -> anyhow::Result<()> {
        let mut snapshot = snapshot.clone();
        sanitize_history(&mut snapshot.messages);
        if snapshot.messages.len() <= 1 {
            debug!(id = %snapshot.id, "skipping save of empty session");
            return Ok(());
        }

        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO sessions (id, created_at, last_updated, first_prompt, provider,
                                   model, working_dir, project_slug, branch_slug, message_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                 last_updated  = excluded.last_updated,
                 first_prompt  = excluded.first_prompt,
                 provider      = excluded.provider,
                 model         = excluded.model,
                 message_count = excluded.message_count",
            params![
                snapshot.id,
                snapshot.created_at.to_rfc3339(),
                snapshot.last_updated.to_rfc3339(),
                first_prompt(&snapshot.messages),
                snapshot.provider,
                snapshot.model,
                snapshot.working_dir,
                snapshot.project_slug,
                snapshot.branch_slug,
                snapshot.messages.len() as i64,
            ],
        )?;
        tx.execute("DELETE FROM messages WHERE session_id = ?1", params![snapshot.id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO messages (session_id, sequence_no, role, content_json)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (seq, msg) in snapshot.messages.iter().enumerate() {
                stmt.execute(params![
                    snapshot.id,
                    seq as i64,
                    role_str(msg.role),
                    serde_json::to_string(msg)?,
                ])?;
            }
        }
        tx.commit()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!(id = %snapshot.id, messages = snapshot.messages.len(), "session saved");
        Ok(())
    }

    pub fn load_session(&self, id: &str) -> anyhow::Result<Option<SessionSnapshot>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let row = conn
            .query_row(
                "SELECT created_at, last_updated, provider, model, working_dir,
                        project_slug, branch_slug
                 FROM sessions WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;
        let Some((created, updated, provider, model, working_dir, project_slug, branch_slug)) = row
        else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT content_json FROM messages WHERE session_id = ?1 ORDER BY sequence_no",
        )?;
        let messages: Vec<Message> = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?
            .iter()
            .map(|json| serde_json::from_str(json))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(SessionSnapshot {
            id: id.to_string(),
            created_at: parse_ts(&created)?,
            last_updated: parse_ts(&updated)?,
            provider,
            model,
            working_dir,
            project_slug,
            branch_slug,
            messages,
        }))
    }

    /// Sessions for one project/branch, newest first.  `limit` 0 = no limit.
    pub fn list_sessions(
        &self,
        project_slug: &str,
        branch_slug: &str,
        limit: u32,
    ) -> anyhow::Result<Vec<SessionEntry>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, created_at, last_updated, first_prompt, provider, model, message_count
             FROM sessions
             WHERE project_slug = ?1 AND branch_slug = ?2
             ORDER BY last_updated DESC
             LIMIT ?3",
        )?;
        let sql_limit: i64 = if limit == 0 { -1 } else { limit as i64 };
        let rows = stmt.query_map(params![project_slug, branch_slug, sql_limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            let (id, created, updated, first_prompt, provider, model, count) = row?;
            entries.push(SessionEntry {
                id,
                created_at: parse_ts(&created)?,
                last_updated: parse_ts(&updated)?,
                first_prompt,
                provider,
                model,
                message_count: count as usize,
            });
        }
        Ok(entries)
    }

    /// Retain at most `max_sessions` most-recent sessions for the scope and
    /// drop any older than `max_age_days`.  Returns the number deleted.
    pub fn cleanup_old_sessions(
        &self,
        project_slug: &str,
        branch_slug: &str,
        max_sessions: u32,
        max_age_days: u32,
    ) -> anyhow::Result<usize> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let overflow = conn.execute(
            "DELETE FROM sessions WHERE id IN (
                 SELECT id FROM sessions
                 WHERE project_slug = ?1 AND branch_slug = ?2
                 ORDER BY last_updated DESC
                 LIMIT -1 OFFSET ?3
             )",
            params![project_slug, branch_slug, max_sessions as i64],
        )?;
        let cutoff = (Utc::now() - chrono::Duration::days(max_age_days as i64)).to_rfc3339();
        let aged = conn.execute(
            "DELETE FROM sessions
             WHERE project_slug = ?1 AND branch_slug = ?2 AND last_updated < ?3",
            params![project_slug, branch_slug, cutoff],
        )?;
        Ok(overflow + aged)
    }

    // ── Prompt history ────────────────────────────────────────────────────────

    pub fn add_prompt(
        &self,
        project_slug: &str,
        branch_slug: &str,
        prompt: &str,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO prompt_history (project_slug, branch_slug, prompt, used_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![project_slug, branch_slug, prompt, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Most recent prompts for the scope, newest first.
    pub fn recent_prompts(
        &self,
        project_slug: &str,
        branch_slug: &str,
        limit: u32,
    ) -> anyhow::Result<Vec<String>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT prompt FROM prompt_history
             WHERE project_slug = ?1 AND branch_slug = ?2
             ORDER BY used_at DESC, rowid DESC
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![project_slug, branch_slug, limit as i64], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::Human => "human",
        Role::Ai => "ai",
        Role::Tool => "tool",
    }
}

/// First human message text, truncated for the listing.
fn first_prompt(messages: &[Message]) -> String {
    messages
        .iter()
        .find(|m| m.role == Role::Human)
        .map(|m| {
            let text = m.text();
            text.chars().take(200).collect()
        })
        .unwrap_or_default()
}

fn parse_ts(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("bad timestamp {s:?}"))?
        .with_timezone(&Utc))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: &str, prompt: &str) -> SessionSnapshot {
        SessionSnapshot {
            id: id.into(),
            created_at: Utc::now(),
            last_updated: Utc::now(),
            provider: "anthropic".into(),
            model: "claude-sonnet-4-5".into(),
            working_dir: "/work/proj".into(),
            project_slug: "acme-widget".into(),
            branch_slug: "main".into(),
            messages: vec![
                Message::system("sys"),
                Message::human(prompt),
                Message::ai("answer"),
            ],
        }
    }

    // ── Round trip ────────────────────────────────────────────────────────────

    #[test]
    fn save_and_load_round_trips() {
        let store = SessionStore::open_in_memory().unwrap();
        let snap = snapshot("s1", "hello");
        store.save_snapshot(&snap).unwrap();
        let loaded = store.load_session("s1").unwrap().unwrap();
        assert_eq!(loaded, snap);
    }

    #[test]
    fn persist_load_persist_is_byte_stable() {
        let store = SessionStore::open_in_memory().unwrap();
        let snap = snapshot("s1", "hello");
        store.save_snapshot(&snap).unwrap();
        let loaded = store.load_session("s1").unwrap().unwrap();
        store.save_snapshot(&loaded).unwrap();
        let loaded2 = store.load_session("s1").unwrap().unwrap();
        assert_eq!(
            serde_json::to_string(&loaded).unwrap(),
            serde_json::to_string(&loaded2).unwrap()
        );
    }

    #[test]
    fn load_unknown_session_is_none() {
        let store = SessionStore::open_in_memory().unwrap();
        assert!(store.load_session("nope").unwrap().is_none());
    }

    #[test]
    fn resave_replaces_messages() {
        let store = SessionStore::open_in_memory().unwrap();
        let mut snap = snapshot("s1", "v1");
        store.save_snapshot(&snap).unwrap();
        snap.messages.push(Message::human("more"));
        snap.messages.push(Message::ai("sure"));
        store.save_snapshot(&snap).unwrap();
        let loaded = store.load_session("s1").unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 5);
    }

    // ── Empty-session rule ────────────────────────────────────────────────────

    #[test]
    fn system_only_session_is_not_written() {
        let store = SessionStore::open_in_memory().unwrap();
        let mut snap = snapshot("empty", "x");
        snap.messages = vec![Message::system("sys")];
        store.save_snapshot(&snap).unwrap();
        assert!(store.load_session("empty").unwrap().is_none());
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn session_that_sanitizes_to_empty_is_not_written() {
        let store = SessionStore::open_in_memory().unwrap();
        let mut snap = snapshot("dangling", "x");
        // Only a system message plus a dangling tool response.
        snap.messages = vec![
            Message::system("sys"),
            Message::tool_response("t1", "grep", "orphan"),
        ];
        store.save_snapshot(&snap).unwrap();
        assert!(store.load_session("dangling").unwrap().is_none());
    }

    #[test]
    fn saved_history_is_sanitized() {
        let store = SessionStore::open_in_memory().unwrap();
        let mut snap = snapshot("s1", "q");
        snap.messages.push(Message {
            role: Role::Ai,
            parts: vec![asimi_model::Part::ToolCall {
                id: "t9".into(),
                name: "grep".into(),
                arguments: "{}".into(),
            }],
        });
        store.save_snapshot(&snap).unwrap();
        let loaded = store.load_session("s1").unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 3, "dangling call must not be persisted");
    }

    // ── Listing ───────────────────────────────────────────────────────────────

    #[test]
    fn list_orders_by_last_updated_desc() {
        let store = SessionStore::open_in_memory().unwrap();
        let mut older = snapshot("older", "first question");
        older.last_updated = Utc::now() - chrono::Duration::hours(2);
        let newer = snapshot("newer", "second question");
        store.save_snapshot(&older).unwrap();
        store.save_snapshot(&newer).unwrap();

        let list = store.list_sessions("acme-widget", "main", 0).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "newer");
        assert_eq!(list[1].id, "older");
        assert_eq!(list[0].first_prompt, "second question");
        assert_eq!(list[0].message_count, 3);
    }

    #[test]
    fn list_respects_limit_and_scope() {
        let store = SessionStore::open_in_memory().unwrap();
        for i in 0..5 {
            store.save_snapshot(&snapshot(&format!("s{i}"), "q")).unwrap();
        }
        let mut other = snapshot("other", "q");
        other.branch_slug = "feature".into();
        store.save_snapshot(&other).unwrap();

        assert_eq!(store.list_sessions("acme-widget", "main", 2).unwrap().len(), 2);
        assert_eq!(store.list_sessions("acme-widget", "main", 0).unwrap().len(), 5);
        assert_eq!(store.list_sessions("acme-widget", "feature", 0).unwrap().len(), 1);
    }

    // ── Cleanup ───────────────────────────────────────────────────────────────

    #[test]
    fn cleanup_keeps_most_recent_sessions() {
        let store = SessionStore::open_in_memory().unwrap();
        for i in 0..6 {
            let mut s = snapshot(&format!("s{i}"), "q");
            s.last_updated = Utc::now() - chrono::Duration::minutes(60 - i);
            store.save_snapshot(&s).unwrap();
        }
        let deleted = store.cleanup_old_sessions("acme-widget", "main", 3, 365).unwrap();
        assert_eq!(deleted, 3);
        let left = store.list_sessions("acme-widget", "main", 0).unwrap();
        assert_eq!(left.len(), 3);
        assert_eq!(left[0].id, "s5", "newest must survive");
    }

    #[test]
    fn cleanup_drops_aged_sessions() {
        let store = SessionStore::open_in_memory().unwrap();
        let mut old = snapshot("ancient", "q");
        old.last_updated = Utc::now() - chrono::Duration::days(90);
        store.save_snapshot(&old).unwrap();
        store.save_snapshot(&snapshot("fresh", "q")).unwrap();

        let deleted = store.cleanup_old_sessions("acme-widget", "main", 50, 30).unwrap();
        assert_eq!(deleted, 1);
        let left = store.list_sessions("acme-widget", "main", 0).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, "fresh");
    }

    #[test]
    fn cleanup_cascades_to_messages() {
        let store = SessionStore::open_in_memory().unwrap();
        let mut old = snapshot("gone", "q");
        old.last_updated = Utc::now() - chrono::Duration::days(90);
        store.save_snapshot(&old).unwrap();
        store.cleanup_old_sessions("acme-widget", "main", 50, 30).unwrap();
        assert!(store.load_session("gone").unwrap().is_none());
        // Orphan messages would make a future insert with the same id grow.
        let conn = store.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM messages WHERE session_id = 'gone'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    // ── Prompt history ────────────────────────────────────────────────────────

    #[test]
    fn prompt_history_is_scoped_and_ordered() {
        let store = SessionStore::open_in_memory().unwrap();
        store.add_prompt("acme-widget", "main", "first").unwrap();
        store.add_prompt("acme-widget", "main", "second").unwrap();
        store.add_prompt("acme-widget", "feature", "elsewhere").unwrap();

        let prompts = store.recent_prompts("acme-widget", "main", 10).unwrap();
        assert_eq!(prompts, vec!["second", "first"]);
    }
}
