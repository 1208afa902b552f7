//! Staff Directory
//!
//! The internal lookup store behind the staff tool. SQLite-backed for
//! the running service (seeded once, read-only afterwards), in-memory
//! for tests. A record matches when the query text contains one of the
//! record's name tokens, which is how the reference deployment resolves
//! "佐藤さん" to 佐藤 健二's record.

use std::fs;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{DirectoryStore, ToolResult};

/// Payload for a miss; the store never reveals near-matches.
const NOT_FOUND_PAYLOAD: &str = "該当する社員が見つかりません。";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffRecord {
    pub id: String,
    pub name: String,
    pub dept: String,
    pub role: String,
    pub email: String,
}

/// The demo records the reference deployment ships.
pub fn demo_records() -> Vec<StaffRecord> {
    vec![
        StaffRecord {
            id: "S001".to_string(),
            name: "佐藤 健二".to_string(),
            dept: "開発部".to_string(),
            role: "部長".to_string(),
            email: "sato.kenji@example.co.jp".to_string(),
        },
        StaffRecord {
            id: "S002".to_string(),
            name: "田中 美咲".to_string(),
            dept: "営業部".to_string(),
            role: "課長".to_string(),
            email: "tanaka.misaki@example.co.jp".to_string(),
        },
        StaffRecord {
            id: "S003".to_string(),
            name: "鈴木 一郎".to_string(),
            dept: "人事部".to_string(),
            role: "一般".to_string(),
            email: "suzuki.ichiro@example.co.jp".to_string(),
        },
    ]
}

/// True when `query` names this record: any whitespace-separated token
/// of the stored name appears in the query text.
fn record_matches(query: &str, record: &StaffRecord) -> bool {
    record
        .name
        .split_whitespace()
        .any(|token| !token.is_empty() && query.contains(token))
}

fn lookup(query: &str, records: &[StaffRecord]) -> Result<ToolResult> {
    for record in records {
        if record_matches(query, record) {
            let payload =
                serde_json::to_string(record).context("failed to serialize staff record")?;
            return Ok(ToolResult {
                found: true,
                payload,
            });
        }
    }
    Ok(ToolResult {
        found: false,
        payload: NOT_FOUND_PAYLOAD.to_string(),
    })
}

// ─── SQLite-Backed Store ─────────────────────────────────────────

const CREATE_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS staff (
    id    TEXT PRIMARY KEY,
    name  TEXT NOT NULL,
    dept  TEXT NOT NULL,
    role  TEXT NOT NULL,
    email TEXT NOT NULL
)";

pub struct SqliteDirectory {
    conn: Mutex<Connection>,
}

impl SqliteDirectory {
    /// Open (or create) the directory database at `db_path` and seed
    /// the demo records if the table is empty.
    pub fn open(db_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create directory db dir: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open directory db: {db_path}"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute(CREATE_TABLE, [])
            .context("failed to create staff table")?;

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM staff", [], |row| row.get(0))?;
        if count == 0 {
            for record in demo_records() {
                conn.execute(
                    "INSERT INTO staff (id, name, dept, role, email) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![record.id, record.name, record.dept, record.role, record.email],
                )?;
            }
            debug!("staff directory seeded");
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn all_records(&self) -> Result<Vec<StaffRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, name, dept, role, email FROM staff")?;
        let rows = stmt.query_map([], |row| {
            Ok(StaffRecord {
                id: row.get(0)?,
                name: row.get(1)?,
                dept: row.get(2)?,
                role: row.get(3)?,
                email: row.get(4)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

#[async_trait]
impl DirectoryStore for SqliteDirectory {
    async fn find_by_name(&self, name: &str) -> Result<ToolResult> {
        lookup(name, &self.all_records()?)
    }
}

// ─── In-Memory Store ─────────────────────────────────────────────

pub struct InMemoryDirectory {
    records: Vec<StaffRecord>,
}

impl InMemoryDirectory {
    pub fn new(records: Vec<StaffRecord>) -> Self {
        Self { records }
    }

    pub fn with_demo_records() -> Self {
        Self::new(demo_records())
    }
}

#[async_trait]
impl DirectoryStore for InMemoryDirectory {
    async fn find_by_name(&self, name: &str) -> Result<ToolResult> {
        lookup(name, &self.records)
    }
}
