use crate::util::{DbError, decode_enum, encode_enum, to_rfc3339};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tally_core::types::{Priority, TaskSource};

pub struct PriorityRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> PriorityRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn list(&self) -> Result<Vec<(TaskSource, String, Priority)>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT source, original_id, priority FROM task_priorities ORDER BY source, original_id")?;
        let mut rows = stmt.query([])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            let source: String = row.get(0)?;
            let original_id: String = row.get(1)?;
            let priority: String = row.get(2)?;
            entries.push((
                TaskSource::parse(&source),
                original_id,
                decode_enum::<Priority>(&priority)?,
            ));
        }
        Ok(entries)
    }

    pub fn upsert(
        &self,
        source: &TaskSource,
        original_id: &str,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO task_priorities (source, original_id, priority, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (source, original_id) DO UPDATE SET priority = excluded.priority, updated_at = excluded.updated_at",
            params![
                source.display_name(),
                original_id,
                encode_enum(&priority)?,
                to_rfc3339(&now),
            ],
        )?;
        Ok(())
    }

    pub fn clear(&self, source: &TaskSource, original_id: &str) -> Result<bool, DbError> {
        let affected = self.conn.execute(
            "DELETE FROM task_priorities WHERE source = ?1 AND original_id = ?2",
            params![source.display_name(), original_id],
        )?;
        Ok(affected > 0)
    }
}
