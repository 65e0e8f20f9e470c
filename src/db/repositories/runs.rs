use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension, Row, Transaction};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_mode, parse_optional_datetime, to_i64, to_u64},
    models::Run,
};

pub(super) const RUN_COLUMNS: &str =
    "id, mode, source, model_names, started_at, finished_at, last_sample, stop_reason";

fn row_to_run(row: &Row) -> Result<Run> {
    let mode: String = row.get("mode")?;
    let model_names: String = row.get("model_names")?;
    let started_at: String = row.get("started_at")?;
    let finished_at: Option<String> = row.get("finished_at")?;
    let last_sample: i64 = row.get("last_sample")?;

    Ok(Run {
        id: row.get("id")?,
        mode: parse_mode(&mode)?,
        source: row.get("source")?,
        model_names: serde_json::from_str(&model_names)
            .with_context(|| "failed to parse model_names")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        finished_at: parse_optional_datetime(finished_at, "finished_at")?,
        last_sample: to_u64(last_sample, "last_sample")?,
        stop_reason: row.get("stop_reason")?,
    })
}

/// Insert or refresh a run row inside an open transaction.
pub(super) fn upsert_run(tx: &Transaction<'_>, run: &Run) -> Result<()> {
    tx.execute(
        "INSERT INTO runs (id, mode, source, model_names, started_at, finished_at, last_sample, stop_reason)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
             finished_at = excluded.finished_at,
             last_sample = excluded.last_sample,
             stop_reason = excluded.stop_reason",
        params![
            run.id,
            run.mode.as_str(),
            run.source,
            serde_json::to_string(&run.model_names)?,
            run.started_at.to_rfc3339(),
            run.finished_at.as_ref().map(|dt| dt.to_rfc3339()),
            to_i64(run.last_sample)?,
            run.stop_reason,
        ],
    )
    .with_context(|| format!("failed to write run {}", run.id))?;
    Ok(())
}

impl Database {
    /// Record a run, or update its completion fields if it already exists.
    pub async fn upsert_run(&self, run: &Run) -> Result<()> {
        let record = run.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            upsert_run(&tx, &record)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        let run_id = run_id.to_string();
        self.execute(move |conn| {
            let query = format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1");
            let run = conn
                .query_row(&query, params![run_id], |row| Ok(row_to_run(row)))
                .optional()?
                .transpose()?;
            Ok(run)
        })
        .await
    }

    /// Most recent runs first.
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<Run>> {
        let limit = to_i64(limit as u64)?;
        self.execute(move |conn| {
            let query = format!(
                "SELECT {RUN_COLUMNS} FROM runs ORDER BY started_at DESC, rowid DESC LIMIT ?1"
            );
            let mut stmt = conn.prepare(&query)?;
            let mut rows = stmt.query(params![limit])?;
            let mut runs = Vec::new();
            while let Some(row) = rows.next()? {
                runs.push(row_to_run(row)?);
            }
            Ok(runs)
        })
        .await
    }

    pub async fn delete_run(&self, run_id: &str) -> Result<bool> {
        let run_id = run_id.to_string();
        self.execute(move |conn| {
            let removed = conn.execute("DELETE FROM runs WHERE id = ?1", params![run_id])?;
            Ok(removed > 0)
        })
        .await
    }
}
