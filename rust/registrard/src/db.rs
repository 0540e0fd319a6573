use crate::model::{ref_id, Collection, EntityId, Snapshot};
use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;

pub const DB_FILE: &str = "registrar.sqlite3";
const GENERATION_KEY: &str = "snapshot.generation";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS snapshot_items(
            collection TEXT NOT NULL,
            item_id INTEGER NOT NULL,
            seq INTEGER NOT NULL,
            raw_json TEXT NOT NULL,
            PRIMARY KEY(collection, item_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_snapshot_items_seq ON snapshot_items(collection, seq)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS snapshot_collections(
            collection TEXT PRIMARY KEY,
            item_count INTEGER NOT NULL,
            skipped_count INTEGER NOT NULL,
            degraded INTEGER NOT NULL,
            imported_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS outbox(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            acked_at TEXT
        )",
        [],
    )?;
    ensure_outbox_failure_columns(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS planner_runs(
            id TEXT PRIMARY KEY,
            semester_id INTEGER NOT NULL,
            department_id INTEGER,
            state TEXT NOT NULL,
            total INTEGER NOT NULL,
            success_count INTEGER NOT NULL,
            error_count INTEGER NOT NULL,
            abort_reason TEXT,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS planner_run_items(
            run_id TEXT NOT NULL,
            idx INTEGER NOT NULL,
            student_id INTEGER NOT NULL,
            student_label TEXT NOT NULL,
            course_ids_json TEXT NOT NULL,
            outcome TEXT NOT NULL,
            message TEXT,
            PRIMARY KEY(run_id, idx),
            FOREIGN KEY(run_id) REFERENCES planner_runs(id)
        )",
        [],
    )?;

    Ok(conn)
}

/// Workspaces created before replay results were recorded lack these.
fn ensure_outbox_failure_columns(conn: &Connection) -> anyhow::Result<()> {
    for column in ["failed_at", "error_code", "error_message"] {
        if !table_has_column(conn, "outbox", column)? {
            conn.execute(&format!("ALTER TABLE outbox ADD COLUMN {} TEXT", column), [])?;
        }
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn now_stamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("settings {} is invalid JSON", key))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, value.to_string()),
    )?;
    Ok(())
}

pub fn snapshot_generation(conn: &Connection) -> anyhow::Result<i64> {
    Ok(settings_get_json(conn, GENERATION_KEY)?
        .and_then(|v| v.as_i64())
        .unwrap_or(0))
}

pub fn bump_generation(conn: &Connection) -> anyhow::Result<i64> {
    let next = snapshot_generation(conn)? + 1;
    settings_set_json(conn, GENERATION_KEY, &serde_json::json!(next))?;
    Ok(next)
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedCollection {
    pub stored: usize,
    pub skipped: usize,
}

/// Replaces a whole collection. Items without a resolvable id, and repeated
/// ids after the first, are skipped. A degraded collection is stored empty.
pub fn replace_collection(
    conn: &Connection,
    collection: Collection,
    items: &[serde_json::Value],
    degraded: bool,
) -> anyhow::Result<ImportedCollection> {
    let key = collection.key();
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM snapshot_items WHERE collection = ?", [key])?;

    let mut summary = ImportedCollection::default();
    {
        let mut stmt = tx.prepare(
            "INSERT INTO snapshot_items(collection, item_id, seq, raw_json)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(collection, item_id) DO NOTHING",
        )?;
        for (seq, item) in items.iter().enumerate() {
            let Some(id) = ref_id(item.get("id")) else {
                summary.skipped += 1;
                continue;
            };
            let inserted = stmt.execute((key, id, seq as i64, item.to_string()))?;
            if inserted == 0 {
                summary.skipped += 1;
            } else {
                summary.stored += 1;
            }
        }
    }

    tx.execute(
        "INSERT INTO snapshot_collections(collection, item_count, skipped_count, degraded, imported_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(collection) DO UPDATE SET
           item_count = excluded.item_count,
           skipped_count = excluded.skipped_count,
           degraded = excluded.degraded,
           imported_at = excluded.imported_at",
        (
            key,
            summary.stored as i64,
            summary.skipped as i64,
            degraded as i64,
            now_stamp(),
        ),
    )?;
    tx.commit()?;
    Ok(summary)
}

pub fn load_collection(conn: &Connection, collection: Collection) -> anyhow::Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare(
        "SELECT raw_json FROM snapshot_items WHERE collection = ? ORDER BY seq",
    )?;
    let rows = stmt
        .query_map([collection.key()], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    rows.iter()
        .map(|raw| {
            serde_json::from_str(raw)
                .with_context(|| format!("corrupt {} item in snapshot", collection.key()))
        })
        .collect()
}

pub fn load_snapshot(conn: &Connection) -> anyhow::Result<Snapshot> {
    let mut snapshot = Snapshot::default();
    for collection in Collection::ALL {
        let items = load_collection(conn, collection)?;
        snapshot.absorb(collection, &items);
    }
    Ok(snapshot)
}

pub fn load_item(
    conn: &Connection,
    collection: Collection,
    id: EntityId,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT raw_json FROM snapshot_items WHERE collection = ? AND item_id = ?",
            (collection.key(), id),
            |r| r.get(0),
        )
        .optional()?;
    raw.map(|s| serde_json::from_str(&s).context("corrupt snapshot item"))
        .transpose()
}

/// Local ids for staged items continue after the largest stored id.
pub fn next_item_id(conn: &Connection, collection: Collection) -> anyhow::Result<EntityId> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(item_id) FROM snapshot_items WHERE collection = ?",
        [collection.key()],
        |r| r.get(0),
    )?;
    Ok(max.unwrap_or(0) + 1)
}

pub fn append_item(
    conn: &Connection,
    collection: Collection,
    item: &serde_json::Value,
) -> anyhow::Result<()> {
    let id = ref_id(item.get("id")).context("staged item has no id")?;
    let next_seq: i64 = conn.query_row(
        "SELECT COALESCE(MAX(seq), -1) + 1 FROM snapshot_items WHERE collection = ?",
        [collection.key()],
        |r| r.get(0),
    )?;
    conn.execute(
        "INSERT INTO snapshot_items(collection, item_id, seq, raw_json) VALUES(?, ?, ?, ?)",
        (collection.key(), id, next_seq, item.to_string()),
    )?;
    Ok(())
}

/// Returns false when the item does not exist.
pub fn update_item<F>(
    conn: &Connection,
    collection: Collection,
    id: EntityId,
    patch: F,
) -> anyhow::Result<bool>
where
    F: FnOnce(&mut serde_json::Value),
{
    let Some(mut item) = load_item(conn, collection, id)? else {
        return Ok(false);
    };
    patch(&mut item);
    conn.execute(
        "UPDATE snapshot_items SET raw_json = ? WHERE collection = ? AND item_id = ?",
        (item.to_string(), collection.key(), id),
    )?;
    Ok(true)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStatus {
    pub collection: String,
    pub item_count: i64,
    pub skipped_count: i64,
    pub degraded: bool,
    pub imported_at: String,
}

pub fn collection_statuses(conn: &Connection) -> anyhow::Result<Vec<CollectionStatus>> {
    let mut stmt = conn.prepare(
        "SELECT collection, item_count, skipped_count, degraded, imported_at
         FROM snapshot_collections
         ORDER BY collection",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(CollectionStatus {
                collection: r.get(0)?,
                item_count: r.get(1)?,
                skipped_count: r.get(2)?,
                degraded: r.get::<_, i64>(3)? != 0,
                imported_at: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub id: i64,
    pub kind: String,
    pub payload: serde_json::Value,
    pub created_at: String,
    pub acked_at: Option<String>,
    pub failed_at: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

pub fn outbox_push(conn: &Connection, kind: &str, payload: &serde_json::Value) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO outbox(kind, payload_json, created_at) VALUES(?, ?, ?)",
        (kind, payload.to_string(), now_stamp()),
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn outbox_list(conn: &Connection, include_acked: bool) -> anyhow::Result<Vec<OutboxEntry>> {
    let sql = if include_acked {
        "SELECT id, kind, payload_json, created_at, acked_at, failed_at, error_code, error_message
         FROM outbox ORDER BY id"
    } else {
        "SELECT id, kind, payload_json, created_at, acked_at, failed_at, error_code, error_message
         FROM outbox WHERE acked_at IS NULL ORDER BY id"
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, Option<String>>(4)?,
                r.get::<_, Option<String>>(5)?,
                r.get::<_, Option<String>>(6)?,
                r.get::<_, Option<String>>(7)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(
            |(id, kind, payload_json, created_at, acked_at, failed_at, error_code, error_message)| {
                Ok(OutboxEntry {
                    id,
                    kind,
                    payload: serde_json::from_str(&payload_json)
                        .with_context(|| format!("outbox entry {} is invalid JSON", id))?,
                    created_at,
                    acked_at,
                    failed_at,
                    error_code,
                    error_message,
                })
            },
        )
        .collect()
}

/// Marks entries as replayed; an earlier failure on the entry is cleared.
pub fn outbox_ack(conn: &Connection, ids: &[i64]) -> anyhow::Result<usize> {
    let stamp = now_stamp();
    let mut acked = 0;
    for id in ids {
        acked += conn.execute(
            "UPDATE outbox
             SET acked_at = ?, failed_at = NULL, error_code = NULL, error_message = NULL
             WHERE id = ? AND acked_at IS NULL",
            (&stamp, id),
        )?;
    }
    Ok(acked)
}

/// Records a rejected replay. The entry stays pending.
pub fn outbox_fail(conn: &Connection, id: i64, code: &str, message: &str) -> anyhow::Result<bool> {
    let n = conn.execute(
        "UPDATE outbox SET failed_at = ?, error_code = ?, error_message = ?
         WHERE id = ? AND acked_at IS NULL",
        (now_stamp(), code, message, id),
    )?;
    Ok(n > 0)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerRunItem {
    pub student_id: EntityId,
    pub student_label: String,
    pub course_ids: Vec<EntityId>,
    pub outcome: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerRunRecord {
    pub id: String,
    pub semester_id: EntityId,
    pub department_id: Option<EntityId>,
    pub state: String,
    pub total: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub abort_reason: Option<String>,
    pub started_at: String,
    pub finished_at: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<PlannerRunItem>,
}

pub fn save_planner_run(conn: &Connection, run: &PlannerRunRecord) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO planner_runs(id, semester_id, department_id, state, total, success_count,
                                  error_count, abort_reason, started_at, finished_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            run.id,
            run.semester_id,
            run.department_id,
            run.state,
            run.total as i64,
            run.success_count as i64,
            run.error_count as i64,
            run.abort_reason,
            run.started_at,
            run.finished_at,
        ],
    )?;
    for (idx, item) in run.items.iter().enumerate() {
        tx.execute(
            "INSERT INTO planner_run_items(run_id, idx, student_id, student_label, course_ids_json,
                                           outcome, message)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                run.id,
                idx as i64,
                item.student_id,
                item.student_label,
                serde_json::to_string(&item.course_ids)?,
                item.outcome,
                item.message,
            ],
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Most recent first; items are not loaded.
pub fn list_planner_runs(conn: &Connection, limit: usize) -> anyhow::Result<Vec<PlannerRunRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, semester_id, department_id, state, total, success_count, error_count,
                abort_reason, started_at, finished_at
         FROM planner_runs
         ORDER BY finished_at DESC, rowid DESC
         LIMIT ?",
    )?;
    let rows = stmt
        .query_map([limit as i64], |r| {
            Ok(PlannerRunRecord {
                id: r.get(0)?,
                semester_id: r.get(1)?,
                department_id: r.get(2)?,
                state: r.get(3)?,
                total: r.get::<_, i64>(4)? as usize,
                success_count: r.get::<_, i64>(5)? as usize,
                error_count: r.get::<_, i64>(6)? as usize,
                abort_reason: r.get(7)?,
                started_at: r.get(8)?,
                finished_at: r.get(9)?,
                items: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_dir(prefix: &str) -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{}-{}", prefix, nanos))
    }

    #[test]
    fn rejected_replay_stays_pending_until_acked() {
        let conn = open_db(&temp_dir("registrard-db-outbox")).expect("open db");
        let a = outbox_push(&conn, "grade.create", &json!({ "grade": "A" })).expect("push");
        let b = outbox_push(&conn, "grade.create", &json!({ "grade": "B" })).expect("push");

        assert!(outbox_fail(&conn, a, "csrf_rejected", "CSRF Failed").expect("fail"));
        let pending = outbox_list(&conn, false).expect("list");
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].error_code.as_deref(), Some("csrf_rejected"));
        assert!(pending[0].failed_at.is_some());
        assert!(pending[1].error_code.is_none());

        assert_eq!(outbox_ack(&conn, &[a, a]).expect("ack"), 1);
        let all = outbox_list(&conn, true).expect("list");
        assert!(all[0].acked_at.is_some());
        assert!(all[0].error_code.is_none() && all[0].error_message.is_none());

        // Acknowledged entries keep their clean state.
        assert!(!outbox_fail(&conn, a, "forbidden", "late").expect("fail"));
        assert_eq!(outbox_list(&conn, false).expect("list").len(), 1);
        assert_eq!(outbox_list(&conn, false).expect("list")[0].id, b);
    }

    #[test]
    fn older_outbox_tables_gain_failure_columns() {
        let dir = temp_dir("registrard-db-upgrade");
        std::fs::create_dir_all(&dir).expect("create temp dir");
        {
            let old = Connection::open(dir.join(DB_FILE)).expect("open raw");
            old.execute(
                "CREATE TABLE outbox(
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    kind TEXT NOT NULL,
                    payload_json TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    acked_at TEXT
                )",
                [],
            )
            .expect("old schema");
            old.execute(
                "INSERT INTO outbox(kind, payload_json, created_at) VALUES('slip.create', '{}', 'then')",
                [],
            )
            .expect("old row");
        }

        let conn = open_db(&dir).expect("reopen");
        assert!(table_has_column(&conn, "outbox", "error_message").expect("columns"));
        let entries = outbox_list(&conn, false).expect("list");
        assert_eq!(entries.len(), 1);
        assert!(entries[0].failed_at.is_none());
        let _ = std::fs::remove_dir_all(dir);
    }
}
