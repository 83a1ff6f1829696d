use std::collections::BTreeMap;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::{SolutionApplied, SolutionOutcome};
use crate::error::EngineError;
use crate::similarity;
use crate::store::solutions as solutions_store;
pub use crate::store::solutions::HistoryFilter;

/// Hard cap on page sizes for the history read.
const MAX_HISTORY_LIMIT: usize = 100;

/// Pool multiplier: how many raw rows to fetch per requested ranked entry,
/// so grouping repeated applications still fills the page.
const POOL_FACTOR: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopSolutionsQuery {
    pub tenant_id: i64,
    pub asset_id: Option<i64>,
    pub component_id: Option<i64>,
    pub sub_component_id: Option<i64>,
    pub limit: usize,
    pub min_effectiveness: i64,
    pub decay_half_life_days: f64,
}

impl TopSolutionsQuery {
    pub fn new(tenant_id: i64) -> Self {
        TopSolutionsQuery {
            tenant_id,
            asset_id: None,
            component_id: None,
            sub_component_id: None,
            limit: 5,
            min_effectiveness: 3,
            decay_half_life_days: 180.0,
        }
    }
}

/// One ranked entry: repeated applications of the same fix collapsed into a
/// single group, scored with temporal decay and a capped usage bonus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedSolution {
    /// Most recent application in the group.
    pub solution: SolutionApplied,
    pub usage_count: usize,
    pub avg_effectiveness: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub last_used_at: OffsetDateTime,
    pub decay_factor: f64,
    pub adjusted_score: f64,
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Grouping key: normalized diagnosis plus the leading slice of the
/// normalized solution text. Two write-ups of the same fix rarely match
/// verbatim past the first sentences.
fn group_key(solution: &SolutionApplied) -> String {
    let normalized_solution = normalize(&solution.solution);
    let prefix: String = normalized_solution.chars().take(100).collect();
    format!("{}|{}", normalize(&solution.diagnosis), prefix)
}

/// Rank historical fixes for an asset/component.
///
/// Raw average effectiveness would let a fix from years ago permanently
/// outrank a slightly-less-effective but recently-validated one. Exponential
/// decay on the most recent use keeps rankings current, while the usage bonus
/// (capped at +20%) rewards proven, repeatable fixes without letting
/// frequency dominate.
pub fn get_top_solutions(
    conn: &Connection,
    query: &TopSolutionsQuery,
) -> Result<Vec<RankedSolution>, EngineError> {
    if query.tenant_id <= 0 {
        return Err(EngineError::validation("tenant id must be positive"));
    }
    if query.limit == 0 || query.limit > 50 {
        return Err(EngineError::validation("limit must be between 1 and 50"));
    }
    if !(1..=5).contains(&query.min_effectiveness) {
        return Err(EngineError::validation(
            "min effectiveness must be between 1 and 5",
        ));
    }
    if query.decay_half_life_days <= 0.0 {
        return Err(EngineError::validation(
            "decay half-life must be positive",
        ));
    }

    let pool = solutions_store::top_candidates(
        conn,
        query.tenant_id,
        query.asset_id,
        query.component_id,
        query.sub_component_id,
        query.min_effectiveness,
        query.limit * POOL_FACTOR,
    )?;

    let mut groups: BTreeMap<String, Vec<SolutionApplied>> = BTreeMap::new();
    for solution in pool {
        groups.entry(group_key(&solution)).or_default().push(solution);
    }

    let now = OffsetDateTime::now_utc();
    let mut ranked: Vec<RankedSolution> = groups
        .into_values()
        .filter_map(|members| {
            let usage_count = members.len();
            let sum: i64 = members.iter().filter_map(|s| s.effectiveness).sum();
            let avg_effectiveness = sum as f64 / usage_count as f64;

            let representative = members
                .into_iter()
                .max_by_key(|s| (s.performed_at, s.id))?;
            let last_used_at = representative.performed_at;

            let age_days = ((now - last_used_at).whole_seconds() as f64 / 86_400.0).max(0.0);
            let decay_factor = (-age_days / query.decay_half_life_days).exp();
            let usage_bonus = (usage_count as f64 / 5.0).min(1.0);
            let adjusted_score = avg_effectiveness * decay_factor * (1.0 + usage_bonus * 0.2);

            Some(RankedSolution {
                solution: representative,
                usage_count,
                avg_effectiveness,
                last_used_at,
                decay_factor,
                adjusted_score,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.adjusted_score
            .total_cmp(&a.adjusted_score)
            .then_with(|| b.last_used_at.cmp(&a.last_used_at))
    });
    ranked.truncate(query.limit);
    Ok(ranked)
}

#[derive(Debug, Clone, Default)]
pub struct SolutionHistoryQuery {
    pub tenant_id: i64,
    pub filter: HistoryFilter,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SolutionHistoryPage {
    pub items: Vec<SolutionApplied>,
    pub total: i64,
    pub has_more: bool,
}

pub fn get_solution_history(
    conn: &Connection,
    query: &SolutionHistoryQuery,
) -> Result<SolutionHistoryPage, EngineError> {
    if query.tenant_id <= 0 {
        return Err(EngineError::validation("tenant id must be positive"));
    }
    if query.limit == 0 || query.limit > MAX_HISTORY_LIMIT {
        return Err(EngineError::validation(format!(
            "limit must be between 1 and {MAX_HISTORY_LIMIT}"
        )));
    }
    if let (Some(from), Some(to)) = (query.filter.from, query.filter.to) {
        if from > to {
            return Err(EngineError::validation("start date is after end date"));
        }
    }

    let (items, total) =
        solutions_store::history(conn, query.tenant_id, &query.filter, query.limit, query.offset)?;
    let has_more = (query.offset + items.len()) < total as usize;
    Ok(SolutionHistoryPage {
        items,
        total,
        has_more,
    })
}

pub fn get_solution_by_id(
    conn: &Connection,
    tenant_id: i64,
    id: i64,
) -> Result<SolutionApplied, EngineError> {
    if id <= 0 {
        return Err(EngineError::validation("solution id must be positive"));
    }
    solutions_store::get(conn, tenant_id, id)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SolutionStats {
    pub total: i64,
    pub worked: i64,
    pub partial: i64,
    pub failed: i64,
    pub avg_effectiveness: Option<f64>,
    pub obsolete_count: i64,
}

pub fn get_solution_stats(
    conn: &Connection,
    tenant_id: i64,
    asset_id: Option<i64>,
) -> Result<SolutionStats, EngineError> {
    if tenant_id <= 0 {
        return Err(EngineError::validation("tenant id must be positive"));
    }

    let counts = solutions_store::outcome_counts(conn, tenant_id, asset_id)?;
    let (avg_effectiveness, obsolete_count) =
        solutions_store::effectiveness_and_obsolete(conn, tenant_id, asset_id)?;

    let mut stats = SolutionStats {
        total: 0,
        worked: 0,
        partial: 0,
        failed: 0,
        avg_effectiveness,
        obsolete_count,
    };
    for (outcome, count) in counts {
        stats.total += count;
        match outcome {
            SolutionOutcome::Funciono => stats.worked += count,
            SolutionOutcome::Parcial => stats.partial += count,
            SolutionOutcome::NoFunciono => stats.failed += count,
        }
    }
    Ok(stats)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarSolutionsQuery {
    pub tenant_id: i64,
    pub asset_id: i64,
    pub component_id: Option<i64>,
    pub sub_component_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub limit: usize,
}

impl SimilarSolutionsQuery {
    pub fn new(tenant_id: i64, asset_id: i64, title: impl Into<String>) -> Self {
        SimilarSolutionsQuery {
            tenant_id,
            asset_id,
            component_id: None,
            sub_component_id: None,
            title: title.into(),
            description: None,
            limit: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarSolution {
    pub solution: SolutionApplied,
    pub similarity: u8,
    pub matched_failure_title: String,
}

const SIMILAR_ACCEPT_THRESHOLD: u8 = 30;
/// Similarity scores this close count as a tie, broken by effectiveness.
const SIMILAR_TIE_BAND: u8 = 10;

/// Retrieve effective prior fixes whose original failure reads like the
/// query. Word-overlap on title and description, taking whichever leg scores
/// higher.
pub fn find_similar_solutions(
    conn: &Connection,
    query: &SimilarSolutionsQuery,
) -> Result<Vec<SimilarSolution>, EngineError> {
    if query.tenant_id <= 0 {
        return Err(EngineError::validation("tenant id must be positive"));
    }
    if query.title.trim().chars().count() < 3 {
        return Err(EngineError::validation(
            "title must be at least 3 characters long",
        ));
    }
    if query.limit == 0 || query.limit > 50 {
        return Err(EngineError::validation("limit must be between 1 and 50"));
    }

    let candidates = solutions_store::similar_candidates(
        conn,
        query.tenant_id,
        query.asset_id,
        query.component_id,
        query.sub_component_id,
        3,
    )?;

    let mut matches: Vec<SimilarSolution> = candidates
        .into_iter()
        .map(|(solution, title, description)| {
            let title_score = similarity::word_overlap(&query.title, &title);
            let description_score = match (&query.description, &description) {
                (Some(a), Some(b)) => similarity::word_overlap(a, b),
                _ => 0,
            };
            SimilarSolution {
                solution,
                similarity: title_score.max(description_score),
                matched_failure_title: title,
            }
        })
        .filter(|m| m.similarity > SIMILAR_ACCEPT_THRESHOLD)
        .collect();

    // Sort in similarity bands of SIMILAR_TIE_BAND points so near-equal
    // scores are ordered by how well the fix worked.
    matches.sort_by_key(|m| {
        (
            std::cmp::Reverse(m.similarity / SIMILAR_TIE_BAND),
            std::cmp::Reverse(m.solution.effectiveness.unwrap_or(0)),
            std::cmp::Reverse(m.similarity),
        )
    });
    matches.truncate(query.limit);
    Ok(matches)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MttrStats {
    pub mean_minutes: Option<f64>,
    pub sample_count: i64,
}

/// Mean time to repair over successful, non-obsolete solution records.
pub fn get_mttr(
    conn: &Connection,
    tenant_id: i64,
    asset_id: Option<i64>,
) -> Result<MttrStats, EngineError> {
    if tenant_id <= 0 {
        return Err(EngineError::validation("tenant id must be positive"));
    }
    let (mean_minutes, sample_count) = solutions_store::mttr(conn, tenant_id, asset_id)?;
    Ok(MttrStats {
        mean_minutes,
        sample_count,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageFrequency {
    pub name: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolsAndParts {
    pub tools: Vec<UsageFrequency>,
    pub parts: Vec<UsageFrequency>,
}

fn top_frequencies(counts: BTreeMap<String, i64>, limit: usize) -> Vec<UsageFrequency> {
    let mut out: Vec<UsageFrequency> = counts
        .into_iter()
        .map(|(name, count)| UsageFrequency { name, count })
        .collect();
    out.sort_by(|a, b| (-(a.count), a.name.clone()).cmp(&(-(b.count), b.name.clone())));
    out.truncate(limit);
    out
}

/// Frequency count of tool and spare-part names across structured usage
/// lists, most used first.
pub fn get_frequent_tools_and_parts(
    conn: &Connection,
    tenant_id: i64,
    asset_id: Option<i64>,
    limit: usize,
) -> Result<ToolsAndParts, EngineError> {
    if tenant_id <= 0 {
        return Err(EngineError::validation("tenant id must be positive"));
    }
    if limit == 0 || limit > 50 {
        return Err(EngineError::validation("limit must be between 1 and 50"));
    }

    let rows = solutions_store::usage_lists(conn, tenant_id, asset_id)?;
    let mut tool_counts: BTreeMap<String, i64> = BTreeMap::new();
    let mut part_counts: BTreeMap<String, i64> = BTreeMap::new();
    for (tools, parts) in rows {
        if let Some(tools) = tools {
            for tool in tools.items {
                *tool_counts.entry(tool.name).or_insert(0) += 1;
            }
        }
        if let Some(parts) = parts {
            for part in parts.items {
                *part_counts.entry(part.name).or_insert(0) += 1;
            }
        }
    }

    Ok(ToolsAndParts {
        tools: top_frequencies(tool_counts, limit),
        parts: top_frequencies(part_counts, limit),
    })
}
