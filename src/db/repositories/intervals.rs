use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{to_i64, to_u64},
    models::{Run, StoredInterval},
};

use super::runs::upsert_run;

fn row_to_interval(row: &Row) -> Result<StoredInterval> {
    let closed_seq: i64 = row.get("closed_seq")?;
    let model_index: i64 = row.get("model_index")?;
    let start_sample: i64 = row.get("start_sample")?;
    let end_sample: i64 = row.get("end_sample")?;
    let rise_time: i64 = row.get("rise_time")?;

    Ok(StoredInterval {
        run_id: row.get("run_id")?,
        closed_seq: to_u64(closed_seq, "closed_seq")?,
        model_index: to_u64(model_index, "model_index")?,
        model_name: row.get("model_name")?,
        start_sample: to_u64(start_sample, "start_sample")?,
        end_sample: to_u64(end_sample, "end_sample")?,
        peak_possibility: row.get("peak_possibility")?,
        opening_possibility: row.get("opening_possibility")?,
        rise_time: to_u64(rise_time, "rise_time")?,
        significant: row.get("significant")?,
    })
}

impl Database {
    /// Write a finished run and all of its closed intervals atomically.
    pub async fn save_run(&self, run: &Run, intervals: &[StoredInterval]) -> Result<()> {
        let run = run.clone();
        let intervals = intervals.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            upsert_run(&tx, &run)?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO intervals (run_id, closed_seq, model_index, model_name, start_sample, end_sample,
                                            peak_possibility, opening_possibility, rise_time, significant)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                )?;
                for interval in &intervals {
                    stmt.execute(params![
                        run.id,
                        to_i64(interval.closed_seq)?,
                        to_i64(interval.model_index)?,
                        interval.model_name,
                        to_i64(interval.start_sample)?,
                        to_i64(interval.end_sample)?,
                        interval.peak_possibility,
                        interval.opening_possibility,
                        to_i64(interval.rise_time)?,
                        interval.significant,
                    ])
                    .with_context(|| {
                        format!("failed to insert interval {} of run {}", interval.closed_seq, run.id)
                    })?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Intervals of one run in close order.
    pub async fn get_intervals_for_run(
        &self,
        run_id: &str,
        significant_only: bool,
    ) -> Result<Vec<StoredInterval>> {
        let run_id = run_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT run_id, closed_seq, model_index, model_name, start_sample, end_sample,
                        peak_possibility, opening_possibility, rise_time, significant
                 FROM intervals
                 WHERE run_id = ?1 AND (?2 = 0 OR significant = 1)
                 ORDER BY closed_seq ASC",
            )?;
            let mut rows = stmt.query(params![run_id, significant_only])?;
            let mut intervals = Vec::new();
            while let Some(row) = rows.next()? {
                intervals.push(row_to_interval(row)?);
            }
            Ok(intervals)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{Database, Run, RunMode, StoredInterval};

    fn interval(run: &Run, seq: u64, model: &str, significant: bool) -> StoredInterval {
        StoredInterval {
            run_id: run.id.clone(),
            closed_seq: seq,
            model_index: 0,
            model_name: model.to_string(),
            start_sample: seq * 10,
            end_sample: seq * 10 + 4,
            peak_possibility: 0.875,
            opening_possibility: 0.5,
            rise_time: 2,
            significant,
        }
    }

    #[tokio::test]
    async fn saves_and_reads_back_a_run() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("store").join("hmp.db")).unwrap();

        let mut run = Run::start(RunMode::Reason, "walk.txt", vec!["Sit".into(), "Walk".into()]);
        run.finish(42, "end of input");
        let intervals = vec![
            interval(&run, 0, "Walk", true),
            interval(&run, 1, "Sit", false),
            interval(&run, 2, "Sit", true),
        ];
        db.save_run(&run, &intervals).await.unwrap();

        let loaded = db.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(loaded.mode, RunMode::Reason);
        assert_eq!(loaded.model_names, vec!["Sit", "Walk"]);
        assert_eq!(loaded.last_sample, 42);
        assert_eq!(loaded.stop_reason.as_deref(), Some("end of input"));

        let all = db.get_intervals_for_run(&run.id, false).await.unwrap();
        assert_eq!(all, intervals);
        let significant = db.get_intervals_for_run(&run.id, true).await.unwrap();
        assert_eq!(significant.len(), 2);
        assert_eq!(significant[1].report_line(), "Sit 20 24 0.8750 2");
    }

    #[tokio::test]
    async fn lists_newest_first_and_deletes_with_intervals() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("hmp.db")).unwrap();

        let first = Run::start(RunMode::Interval, "/dev/ttyUSB0", vec!["Sit".into()]);
        db.upsert_run(&first).await.unwrap();
        let mut second = Run::start(RunMode::Ultimate, "-", vec!["Sit".into()]);
        second.started_at = first.started_at + chrono::Duration::seconds(5);
        db.save_run(&second, &[interval(&second, 0, "Sit", true)]).await.unwrap();

        let runs = db.list_runs(10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, second.id);
        assert!(runs[1].finished_at.is_none());

        assert!(db.delete_run(&second.id).await.unwrap());
        assert!(db.get_intervals_for_run(&second.id, false).await.unwrap().is_empty());
        assert!(db.get_run(&second.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reopening_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hmp.db");
        let run = Run::start(RunMode::Reason, "a.txt", vec!["Sit".into()]);
        {
            let db = Database::new(path.clone()).unwrap();
            db.upsert_run(&run).await.unwrap();
        }
        let db = Database::new(path).unwrap();
        assert_eq!(db.list_runs(5).await.unwrap()[0].id, run.id);
    }
}
