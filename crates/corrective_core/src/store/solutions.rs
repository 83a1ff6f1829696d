use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, ToSql};
use time::OffsetDateTime;

use crate::domain::{
    SolutionApplied, SolutionOutcome, SparePartUsageList, ToolUsageList,
};
use crate::error::EngineError;

const COLUMNS: &str = r#"
  s.id, s.tenant_id, s.failure_occurrence_id, s.diagnosis, s.solution,
  s.confirmed_cause, s.outcome, s.effectiveness, s.performed_by, s.performed_at,
  s.actual_minutes, s.final_component_id, s.final_sub_component_id, s.fix_type,
  s.tools_used, s.spare_parts_used, s.is_obsolete
"#;

#[derive(Debug, Clone)]
pub struct NewSolutionApplied {
    pub tenant_id: i64,
    pub failure_occurrence_id: i64,
    pub diagnosis: String,
    pub solution: String,
    pub confirmed_cause: Option<String>,
    pub outcome: SolutionOutcome,
    pub effectiveness: Option<i64>,
    pub performed_by: i64,
    pub performed_at: OffsetDateTime,
    pub actual_minutes: Option<i64>,
    pub final_component_id: Option<i64>,
    pub final_sub_component_id: Option<i64>,
    pub fix_type: Option<String>,
    pub tools_used: Option<ToolUsageList>,
    pub spare_parts_used: Option<SparePartUsageList>,
}

/// Filters shared by the history read and its count.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub asset_id: Option<i64>,
    pub component_id: Option<i64>,
    pub performed_by: Option<i64>,
    pub outcome: Option<SolutionOutcome>,
    pub min_effectiveness: Option<i64>,
    pub from: Option<OffsetDateTime>,
    pub to: Option<OffsetDateTime>,
    /// Case-insensitive substring over diagnosis and solution text.
    pub text: Option<String>,
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<SolutionApplied> {
    let tools_raw: Option<String> = row.get(14)?;
    let parts_raw: Option<String> = row.get(15)?;
    let tools_used = match tools_raw {
        Some(raw) => Some(ToolUsageList::decode(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(14, Type::Text, Box::new(e))
        })?),
        None => None,
    };
    let spare_parts_used = match parts_raw {
        Some(raw) => Some(SparePartUsageList::decode(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(15, Type::Text, Box::new(e))
        })?),
        None => None,
    };
    Ok(SolutionApplied {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        failure_occurrence_id: row.get(2)?,
        diagnosis: row.get(3)?,
        solution: row.get(4)?,
        confirmed_cause: row.get(5)?,
        outcome: row.get(6)?,
        effectiveness: row.get(7)?,
        performed_by: row.get(8)?,
        performed_at: row.get(9)?,
        actual_minutes: row.get(10)?,
        final_component_id: row.get(11)?,
        final_sub_component_id: row.get(12)?,
        fix_type: row.get(13)?,
        tools_used,
        spare_parts_used,
        is_obsolete: row.get(16)?,
    })
}

pub fn create(conn: &Connection, new: &NewSolutionApplied) -> Result<SolutionApplied, EngineError> {
    conn.execute(
        r#"
      INSERT INTO solutions_applied (
        tenant_id, failure_occurrence_id, diagnosis, solution, confirmed_cause,
        outcome, effectiveness, performed_by, performed_at, actual_minutes,
        final_component_id, final_sub_component_id, fix_type, tools_used,
        spare_parts_used
      ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
      "#,
        rusqlite::params![
            new.tenant_id,
            new.failure_occurrence_id,
            new.diagnosis,
            new.solution,
            new.confirmed_cause,
            new.outcome,
            new.effectiveness,
            new.performed_by,
            new.performed_at,
            new.actual_minutes,
            new.final_component_id,
            new.final_sub_component_id,
            new.fix_type,
            new.tools_used.as_ref().map(|l| l.encode()).transpose()?,
            new.spare_parts_used.as_ref().map(|l| l.encode()).transpose()?,
        ],
    )
    .map_err(|e| EngineError::store("insert solution record", e))?;
    get(conn, new.tenant_id, conn.last_insert_rowid())
}

pub fn get(conn: &Connection, tenant_id: i64, id: i64) -> Result<SolutionApplied, EngineError> {
    let sql = format!("SELECT {COLUMNS} FROM solutions_applied s WHERE s.tenant_id = ?1 AND s.id = ?2");
    conn.query_row(&sql, rusqlite::params![tenant_id, id], from_row)
        .optional()
        .map_err(|e| EngineError::store("read solution record", e))?
        .ok_or_else(|| EngineError::not_found("SolutionApplied", id))
}

pub fn mark_obsolete(conn: &Connection, tenant_id: i64, id: i64) -> Result<(), EngineError> {
    let changed = conn
        .execute(
            "UPDATE solutions_applied SET is_obsolete = 1 WHERE tenant_id = ?1 AND id = ?2",
            rusqlite::params![tenant_id, id],
        )
        .map_err(|e| EngineError::store("mark solution obsolete", e))?;
    if changed == 0 {
        return Err(EngineError::not_found("SolutionApplied", id));
    }
    Ok(())
}

/// Candidate pool for top-solution ranking: effective, non-obsolete fixes that
/// worked, most effective and most recent first. Asset scoping goes through
/// the originating occurrence.
pub fn top_candidates(
    conn: &Connection,
    tenant_id: i64,
    asset_id: Option<i64>,
    component_id: Option<i64>,
    sub_component_id: Option<i64>,
    min_effectiveness: i64,
    pool_limit: usize,
) -> Result<Vec<SolutionApplied>, EngineError> {
    let sql = format!(
        r#"
      SELECT {COLUMNS}
      FROM solutions_applied s
      JOIN failure_occurrences f ON f.id = s.failure_occurrence_id
      WHERE s.tenant_id = ?1
        AND s.is_obsolete = 0
        AND s.outcome = 'FUNCIONÓ'
        AND s.effectiveness IS NOT NULL
        AND s.effectiveness >= ?2
        AND (?3 IS NULL OR f.asset_id = ?3)
        AND (?4 IS NULL OR s.final_component_id = ?4)
        AND (?5 IS NULL OR s.final_sub_component_id = ?5)
      ORDER BY s.effectiveness DESC, s.performed_at DESC, s.id DESC
      LIMIT ?6
      "#
    );
    collect(
        conn,
        &sql,
        rusqlite::params![
            tenant_id,
            min_effectiveness,
            asset_id,
            component_id,
            sub_component_id,
            pool_limit as i64
        ],
    )
}

/// Candidates for free-text similarity retrieval, joined with the title and
/// description of the failure they originally fixed.
pub fn similar_candidates(
    conn: &Connection,
    tenant_id: i64,
    asset_id: i64,
    component_id: Option<i64>,
    sub_component_id: Option<i64>,
    min_effectiveness: i64,
) -> Result<Vec<(SolutionApplied, String, Option<String>)>, EngineError> {
    let sql = format!(
        r#"
      SELECT {COLUMNS}, f.title, f.description
      FROM solutions_applied s
      JOIN failure_occurrences f ON f.id = s.failure_occurrence_id
      WHERE s.tenant_id = ?1
        AND f.asset_id = ?2
        AND s.is_obsolete = 0
        AND s.outcome = 'FUNCIONÓ'
        AND s.effectiveness IS NOT NULL
        AND s.effectiveness >= ?3
        AND (?4 IS NULL OR s.final_component_id = ?4)
        AND (?5 IS NULL OR s.final_sub_component_id = ?5)
      ORDER BY s.performed_at DESC, s.id DESC
      "#
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| EngineError::store("prepare similar-solutions query", e))?;
    let rows = stmt
        .query_map(
            rusqlite::params![tenant_id, asset_id, min_effectiveness, component_id, sub_component_id],
            |row| {
                let solution = from_row(row)?;
                let title: String = row.get(17)?;
                let description: Option<String> = row.get(18)?;
                Ok((solution, title, description))
            },
        )
        .map_err(|e| EngineError::store("query similar-solution candidates", e))?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r.map_err(|e| EngineError::store("decode similar-solution row", e))?);
    }
    Ok(out)
}

fn filter_clauses(filter: &HistoryFilter, clauses: &mut Vec<&'static str>, params: &mut Vec<Box<dyn ToSql>>) {
    if let Some(asset_id) = filter.asset_id {
        clauses.push("f.asset_id = ?");
        params.push(Box::new(asset_id));
    }
    if let Some(component_id) = filter.component_id {
        clauses.push("s.final_component_id = ?");
        params.push(Box::new(component_id));
    }
    if let Some(performed_by) = filter.performed_by {
        clauses.push("s.performed_by = ?");
        params.push(Box::new(performed_by));
    }
    if let Some(outcome) = filter.outcome {
        clauses.push("s.outcome = ?");
        params.push(Box::new(outcome));
    }
    if let Some(min) = filter.min_effectiveness {
        clauses.push("s.effectiveness >= ?");
        params.push(Box::new(min));
    }
    if let Some(from) = filter.from {
        clauses.push("s.performed_at >= ?");
        params.push(Box::new(from));
    }
    if let Some(to) = filter.to {
        clauses.push("s.performed_at <= ?");
        params.push(Box::new(to));
    }
    if let Some(text) = &filter.text {
        clauses.push("(s.diagnosis LIKE ? COLLATE NOCASE OR s.solution LIKE ? COLLATE NOCASE)");
        let pattern = format!("%{text}%");
        params.push(Box::new(pattern.clone()));
        params.push(Box::new(pattern));
    }
}

/// Filtered, paginated history read. SQLite's positional `?` binds in clause
/// order, so clause and parameter construction stay side by side.
pub fn history(
    conn: &Connection,
    tenant_id: i64,
    filter: &HistoryFilter,
    limit: usize,
    offset: usize,
) -> Result<(Vec<SolutionApplied>, i64), EngineError> {
    let mut clauses: Vec<&'static str> = vec!["s.tenant_id = ?"];
    let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(tenant_id)];
    filter_clauses(filter, &mut clauses, &mut params);
    let where_sql = clauses.join(" AND ");

    let count_sql = format!(
        "SELECT COUNT(*) FROM solutions_applied s JOIN failure_occurrences f ON f.id = s.failure_occurrence_id WHERE {where_sql}"
    );
    let count_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let total: i64 = conn
        .query_row(&count_sql, &count_refs[..], |row| row.get(0))
        .map_err(|e| EngineError::store("count solution history", e))?;

    let page_sql = format!(
        r#"
      SELECT {COLUMNS}
      FROM solutions_applied s
      JOIN failure_occurrences f ON f.id = s.failure_occurrence_id
      WHERE {where_sql}
      ORDER BY s.performed_at DESC, s.id DESC
      LIMIT ? OFFSET ?
      "#
    );
    params.push(Box::new(limit as i64));
    params.push(Box::new(offset as i64));
    let page_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let mut stmt = conn
        .prepare(&page_sql)
        .map_err(|e| EngineError::store("prepare solution history query", e))?;
    let rows = stmt
        .query_map(&page_refs[..], from_row)
        .map_err(|e| EngineError::store("query solution history", e))?;

    let mut items = Vec::new();
    for r in rows {
        items.push(r.map_err(|e| EngineError::store("decode solution history row", e))?);
    }
    Ok((items, total))
}

/// Mean resolution minutes over successful repairs, with the sample size.
pub fn mttr(
    conn: &Connection,
    tenant_id: i64,
    asset_id: Option<i64>,
) -> Result<(Option<f64>, i64), EngineError> {
    conn.query_row(
        r#"
      SELECT AVG(s.actual_minutes), COUNT(s.actual_minutes)
      FROM solutions_applied s
      JOIN failure_occurrences f ON f.id = s.failure_occurrence_id
      WHERE s.tenant_id = ?1
        AND s.outcome = 'FUNCIONÓ'
        AND s.is_obsolete = 0
        AND s.actual_minutes IS NOT NULL
        AND (?2 IS NULL OR f.asset_id = ?2)
      "#,
        rusqlite::params![tenant_id, asset_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .map_err(|e| EngineError::store("aggregate MTTR", e))
}

/// Per-outcome counts plus overall effectiveness/obsolescence aggregates.
pub fn outcome_counts(
    conn: &Connection,
    tenant_id: i64,
    asset_id: Option<i64>,
) -> Result<Vec<(SolutionOutcome, i64)>, EngineError> {
    let mut stmt = conn
        .prepare(
            r#"
      SELECT s.outcome, COUNT(*)
      FROM solutions_applied s
      JOIN failure_occurrences f ON f.id = s.failure_occurrence_id
      WHERE s.tenant_id = ?1 AND (?2 IS NULL OR f.asset_id = ?2)
      GROUP BY s.outcome
      ORDER BY s.outcome
      "#,
        )
        .map_err(|e| EngineError::store("prepare outcome counts", e))?;
    let rows = stmt
        .query_map(rusqlite::params![tenant_id, asset_id], |row| {
            Ok((row.get::<_, SolutionOutcome>(0)?, row.get::<_, i64>(1)?))
        })
        .map_err(|e| EngineError::store("query outcome counts", e))?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r.map_err(|e| EngineError::store("decode outcome count row", e))?);
    }
    Ok(out)
}

pub fn effectiveness_and_obsolete(
    conn: &Connection,
    tenant_id: i64,
    asset_id: Option<i64>,
) -> Result<(Option<f64>, i64), EngineError> {
    conn.query_row(
        r#"
      SELECT AVG(s.effectiveness), SUM(s.is_obsolete)
      FROM solutions_applied s
      JOIN failure_occurrences f ON f.id = s.failure_occurrence_id
      WHERE s.tenant_id = ?1 AND (?2 IS NULL OR f.asset_id = ?2)
      "#,
        rusqlite::params![tenant_id, asset_id],
        |row| {
            let avg: Option<f64> = row.get(0)?;
            let obsolete: Option<i64> = row.get(1)?;
            Ok((avg, obsolete.unwrap_or(0)))
        },
    )
    .map_err(|e| EngineError::store("aggregate solution stats", e))
}

/// Rows carrying structured tool/part usage, for frequency counting.
pub fn usage_lists(
    conn: &Connection,
    tenant_id: i64,
    asset_id: Option<i64>,
) -> Result<Vec<(Option<ToolUsageList>, Option<SparePartUsageList>)>, EngineError> {
    let mut stmt = conn
        .prepare(
            r#"
      SELECT s.tools_used, s.spare_parts_used
      FROM solutions_applied s
      JOIN failure_occurrences f ON f.id = s.failure_occurrence_id
      WHERE s.tenant_id = ?1
        AND s.is_obsolete = 0
        AND (?2 IS NULL OR f.asset_id = ?2)
        AND (s.tools_used IS NOT NULL OR s.spare_parts_used IS NOT NULL)
      "#,
        )
        .map_err(|e| EngineError::store("prepare usage-list query", e))?;
    let rows = stmt
        .query_map(rusqlite::params![tenant_id, asset_id], |row| {
            Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?))
        })
        .map_err(|e| EngineError::store("query usage lists", e))?;

    let mut out = Vec::new();
    for r in rows {
        let (tools_raw, parts_raw) =
            r.map_err(|e| EngineError::store("decode usage-list row", e))?;
        let tools = tools_raw.as_deref().map(ToolUsageList::decode).transpose()?;
        let parts = parts_raw
            .as_deref()
            .map(SparePartUsageList::decode)
            .transpose()?;
        out.push((tools, parts));
    }
    Ok(out)
}

fn collect(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<SolutionApplied>, EngineError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| EngineError::store("prepare solution query", e))?;
    let rows = stmt
        .query_map(params, from_row)
        .map_err(|e| EngineError::store("query solutions", e))?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r.map_err(|e| EngineError::store("decode solution row", e))?);
    }
    Ok(out)
}
