use crate::util::{
    DbError, decode_json, encode_json, from_optional_rfc3339, from_rfc3339, to_rfc3339,
};
use rusqlite::{Connection, Row, params};
use serde_json::{Map, Value};
use tally_core::types::{CompletedSnapshot, ProviderFields, TaskSource};

const COLUMNS: &str = "source, original_id, id, title, description, notes, status, url, container_id, container_name, locally_completed, completed_at, created_at, updated_at, previous_id, previous_original_id, provider, extra";

pub struct CompletionRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> CompletionRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn list(&self) -> Result<Vec<CompletedSnapshot>, DbError> {
        let sql = format!("SELECT {COLUMNS} FROM completed_tasks ORDER BY created_at, source, original_id");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut snapshots = Vec::new();
        while let Some(row) = rows.next()? {
            snapshots.push(map_snapshot_row(row)?);
        }
        Ok(snapshots)
    }

    pub fn get(
        &self,
        source: &TaskSource,
        original_id: &str,
    ) -> Result<Option<CompletedSnapshot>, DbError> {
        let sql = format!("SELECT {COLUMNS} FROM completed_tasks WHERE source = ?1 AND original_id = ?2");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![source.display_name(), original_id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        Ok(Some(map_snapshot_row(row)?))
    }

    /// Inserts or fully replaces the row for the snapshot's key.
    pub fn write(&self, snapshot: &CompletedSnapshot) -> Result<(), DbError> {
        let sql = format!(
            "INSERT OR REPLACE INTO completed_tasks ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
        );
        let created_at = snapshot.created_at.or(snapshot.updated_at).ok_or_else(|| {
            DbError::InvalidTimestamp {
                value: "createdAt missing".to_string(),
            }
        })?;
        let updated_at = snapshot.updated_at.unwrap_or(created_at);
        let provider = if snapshot.provider.is_none() {
            None
        } else {
            Some(encode_json(&snapshot.provider)?)
        };
        self.conn.execute(
            &sql,
            params![
                snapshot.source.display_name(),
                snapshot.original_id,
                snapshot.id.clone().unwrap_or_default(),
                snapshot.title,
                snapshot.description,
                snapshot.notes,
                snapshot.status,
                snapshot.url,
                snapshot.container_id,
                snapshot.container_name,
                snapshot.locally_completed,
                snapshot.completed_at.as_ref().map(to_rfc3339),
                to_rfc3339(&created_at),
                to_rfc3339(&updated_at),
                snapshot.previous_id,
                snapshot.previous_original_id,
                provider,
                encode_json(&snapshot.extra)?,
            ],
        )?;
        Ok(())
    }

    pub fn delete(&self, source: &TaskSource, original_id: &str) -> Result<bool, DbError> {
        let affected = self.conn.execute(
            "DELETE FROM completed_tasks WHERE source = ?1 AND original_id = ?2",
            params![source.display_name(), original_id],
        )?;
        Ok(affected > 0)
    }
}

fn map_snapshot_row(row: &Row<'_>) -> Result<CompletedSnapshot, DbError> {
    let source: String = row.get(0)?;
    let id: String = row.get(2)?;
    let completed_at: Option<String> = row.get(11)?;
    let created_at: String = row.get(12)?;
    let updated_at: String = row.get(13)?;
    let provider: Option<String> = row.get(16)?;
    let extra: String = row.get(17)?;

    Ok(CompletedSnapshot {
        source: TaskSource::parse(&source),
        original_id: row.get(1)?,
        id: (!id.is_empty()).then_some(id),
        title: row.get(3)?,
        description: row.get(4)?,
        notes: row.get(5)?,
        status: row.get(6)?,
        url: row.get(7)?,
        container_id: row.get(8)?,
        container_name: row.get(9)?,
        locally_completed: row.get(10)?,
        completed_at: from_optional_rfc3339(completed_at)?,
        created_at: Some(from_rfc3339(&created_at)?),
        updated_at: Some(from_rfc3339(&updated_at)?),
        previous_id: row.get(14)?,
        previous_original_id: row.get(15)?,
        provider: match provider {
            Some(provider) => decode_json::<ProviderFields>(&provider)?,
            None => ProviderFields::None,
        },
        extra: decode_json::<Map<String, Value>>(&extra)?,
    })
}
