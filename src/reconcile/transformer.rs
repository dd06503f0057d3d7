//! Stored row → canonical result.
//!
//! Rows written by different generations of the platform keep their scores in
//! different places. [`classify`] names the shape once; [`transform`] converts
//! each shape with a single exhaustive match. Conversion never fails: input it
//! cannot read degrades to whatever the scalar columns still provide.

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::career::enrich_recommendations;
use crate::types::utils::{is_blank, json_f64, json_string};
use crate::types::{
    AptitudeBlock, BigFiveBlock, CanonicalResult, DomainScore, EmployabilityBlock,
    KnowledgeBlock, ResultRow, ResultSource, RiasecBlock, RiasecScores,
    canonical::{APTITUDE_DOMAINS, RIASEC_MAX_SCORE, employability_level},
};

/// Legacy aptitude task types and the test domains they stand in for
const TASK_TO_DOMAIN: [(&str, &str); 5] = [
    ("Analytical", "numerical"),
    ("Creative", "abstract"),
    ("Technical", "spatial"),
    ("Social", "verbal"),
    ("Practical", "clerical"),
];

/// Row columns carried into `extra` under their camelCase names
const PASSTHROUGH_COLUMNS: [(&str, &str); 7] = [
    ("generated_at", "generatedAt"),
    ("created_at", "createdAt"),
    ("updated_at", "updatedAt"),
    ("learning_styles", "learningStyles"),
    ("work_preferences", "workPreferences"),
    ("skill_gap_courses", "skillGapCourses"),
    ("platform_courses", "platformCourses"),
];

// =============================================================================
// Shape Classification
// =============================================================================

/// Where a stored result keeps its data
#[derive(Debug, Clone, PartialEq)]
pub enum StoredShape {
    /// Already converted by this crate
    Canonical(Box<CanonicalResult>),
    /// Complete AI analysis blob with interest scores
    AiBlob { row: ResultRow, blob: Value },
    /// Older nested analysis blob; scores live in the columns
    NestedAnalysis { row: ResultRow, blob: Value },
    /// Scalar columns only. `source` is `Fallback` when a blob was present
    /// but unreadable.
    LegacyColumns { row: ResultRow, source: ResultSource },
}

impl StoredShape {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Canonical(_) => "canonical",
            Self::AiBlob { .. } => "ai_blob",
            Self::NestedAnalysis { .. } => "nested_analysis",
            Self::LegacyColumns { .. } => "legacy_columns",
        }
    }
}

fn is_canonical(value: &Value) -> bool {
    value.get("_transformed").and_then(Value::as_bool) == Some(true)
}

fn parse_canonical(value: &Value) -> Option<CanonicalResult> {
    match serde_json::from_value::<CanonicalResult>(value.clone()) {
        Ok(result) => Some(result),
        Err(e) => {
            warn!("Marked-canonical object did not parse, re-deriving: {}", e);
            None
        }
    }
}

/// Identity columns win over whatever a stored blob says.
fn fill_identity(result: &mut CanonicalResult, row: &ResultRow) {
    result.id = result.id.take().or_else(|| row.id.clone());
    result.attempt_id = result.attempt_id.take().or_else(|| row.attempt_id.clone());
    result.student_id = result.student_id.take().or_else(|| row.student_id.clone());
    result.stream_id = result.stream_id.take().or_else(|| row.stream_id.clone());
    result.grade_level = result.grade_level.take().or_else(|| row.grade_level.clone());
}

/// Name the stored shape of `input`: a canonical object or a raw result row.
pub fn classify(input: &Value) -> StoredShape {
    if is_canonical(input)
        && let Some(result) = parse_canonical(input)
    {
        return StoredShape::Canonical(Box::new(result));
    }

    let row = match serde_json::from_value::<ResultRow>(input.clone()) {
        Ok(row) => row,
        Err(e) => {
            warn!("Unreadable result record, using empty row: {}", e);
            return StoredShape::LegacyColumns {
                row: ResultRow::default(),
                source: ResultSource::Fallback,
            };
        }
    };

    match row.analysis_blob() {
        None => StoredShape::LegacyColumns {
            row,
            source: ResultSource::LegacyColumns,
        },
        Some(Err(raw)) => {
            warn!(
                attempt = ?row.attempt_id,
                chars = raw.len(),
                "Analysis blob is not JSON, rebuilding from columns"
            );
            StoredShape::LegacyColumns {
                row,
                source: ResultSource::Fallback,
            }
        }
        Some(Ok(blob)) if !blob.is_object() => {
            warn!(attempt = ?row.attempt_id, "Analysis blob is not an object, rebuilding from columns");
            StoredShape::LegacyColumns {
                row,
                source: ResultSource::Fallback,
            }
        }
        Some(Ok(blob)) if is_canonical(&blob) => match parse_canonical(&blob) {
            Some(mut result) => {
                fill_identity(&mut result, &row);
                StoredShape::Canonical(Box::new(result))
            }
            None => StoredShape::LegacyColumns {
                row,
                source: ResultSource::Fallback,
            },
        },
        Some(Ok(blob)) => {
            let has_scores = blob
                .get("riasec")
                .and_then(|r| r.get("scores"))
                .is_some_and(|s| !is_blank(s));
            if has_scores {
                StoredShape::AiBlob { row, blob }
            } else {
                StoredShape::NestedAnalysis { row, blob }
            }
        }
    }
}

// =============================================================================
// Conversion
// =============================================================================

/// Convert any stored shape to the canonical result. Canonical input comes
/// back unchanged.
pub fn transform(input: &Value) -> CanonicalResult {
    let shape = classify(input);
    debug!(shape = shape.name(), "Transforming result");

    match shape {
        StoredShape::Canonical(result) => *result,
        StoredShape::AiBlob { row, blob } => match serde_json::from_value::<CanonicalResult>(blob) {
            Ok(mut result) => {
                fill_identity(&mut result, &row);
                result.transformed = true;
                result.source = ResultSource::AiBlob;
                result
            }
            Err(e) => {
                warn!(attempt = ?row.attempt_id, "AI blob did not deserialize, rebuilding from columns: {}", e);
                from_columns(&row, None, ResultSource::Fallback)
            }
        },
        StoredShape::NestedAnalysis { row, blob } => {
            from_columns(&row, Some(&blob), ResultSource::NestedAnalysis)
        }
        StoredShape::LegacyColumns { row, source } => from_columns(&row, None, source),
    }
}

/// Convert a typed row.
pub fn transform_row(row: &ResultRow) -> CanonicalResult {
    match serde_json::to_value(row) {
        Ok(value) => transform(&value),
        Err(e) => {
            warn!("Result row did not serialize: {}", e);
            from_columns(row, None, ResultSource::Fallback)
        }
    }
}

fn from_columns(row: &ResultRow, nested: Option<&Value>, source: ResultSource) -> CanonicalResult {
    let riasec = riasec_from_columns(row);
    let narrative = nested.map(narrative_from_nested).unwrap_or_default();

    let career_fit = row.column("career_fit").cloned().or(narrative.career_fit).or_else(|| {
        let items = row.column("career_recommendations")?.as_array()?;
        let clusters = enrich_recommendations(items, riasec.as_ref().map(|r| &r.scores));
        Some(json!({ "clusters": clusters }))
    });

    let mut extra = Map::new();
    if let Some(status) = &row.status {
        extra.insert("status".to_string(), json!(status));
    }
    for (column, key) in PASSTHROUGH_COLUMNS {
        if let Some(value) = row.column(column) {
            extra.insert(key.to_string(), value.clone());
        }
    }

    CanonicalResult {
        transformed: true,
        source,
        id: row.id.clone(),
        attempt_id: row.attempt_id.clone(),
        student_id: row.student_id.clone(),
        stream_id: row.stream_id.clone(),
        grade_level: row.grade_level.clone(),
        riasec,
        aptitude: row
            .column("aptitude_scores")
            .and_then(aptitude_from_column)
            .map(|mut block| {
                if block.overall_score.is_none() {
                    block.overall_score = row.number("aptitude_overall");
                }
                block
            }),
        big_five: ["bigfive_scores", "personality_scores"]
            .iter()
            .find_map(|c| row.column(c))
            .and_then(|v| serde_json::from_value::<BigFiveBlock>(v.clone()).ok())
            .filter(BigFiveBlock::has_any),
        work_values: row.column("work_values_scores").cloned(),
        employability: employability_from_columns(row),
        knowledge: knowledge_from_columns(row),
        strengths: strengths_from_columns(row),
        career_fit,
        skill_gap: row
            .column("skill_gap")
            .map(|v| match v.as_array() {
                Some(items) => json!({ "gaps": skill_gaps(items) }),
                None => v.clone(),
            })
            .or(narrative.skill_gap),
        roadmap: row
            .column("roadmap")
            .map(|v| match v.as_array() {
                Some(items) => json!({ "steps": roadmap_steps(items) }),
                None => v.clone(),
            })
            .or(narrative.roadmap),
        profile_snapshot: row.column("profile_snapshot").cloned(),
        timing_analysis: row.column("timing_analysis").cloned(),
        final_note: row.column("final_note").cloned(),
        overall_summary: row.column("overall_summary").cloned().or(narrative.overall_summary),
        gemini_results: nested.cloned(),
        extra,
    }
}

// =============================================================================
// Column Helpers
// =============================================================================

fn riasec_from_columns(row: &ResultRow) -> Option<RiasecBlock> {
    let scores = row.column("riasec_scores").and_then(RiasecScores::from_value)?;
    let top_three = match row.column("top_interests") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        Some(Value::String(s)) => s.chars().filter(|c| c.is_ascii_alphabetic()).map(String::from).collect(),
        _ => Vec::new(),
    };
    Some(RiasecBlock {
        scores,
        max_score: Some(RIASEC_MAX_SCORE),
        code: row.column("riasec_code").and_then(|v| v.as_str()).map(String::from),
        top_three,
        ..RiasecBlock::default()
    })
}

fn strengths_from_columns(row: &ResultRow) -> Option<Value> {
    let scores = row.column("strengths_scores");
    let top = row.column("top_strengths");
    if scores.is_none() && top.is_none() {
        return None;
    }
    Some(json!({
        "scores": scores.cloned().unwrap_or_else(|| json!({})),
        "top": top.cloned().unwrap_or_else(|| json!([])),
    }))
}

/// Test-based scores are used directly; legacy task-based ratings
/// (`ease`/`enjoyment` on a 1-5 scale) are mapped onto test domains.
pub fn aptitude_from_column(value: &Value) -> Option<AptitudeBlock> {
    let map = value.as_object()?;

    let test_based = map.keys().any(|k| {
        APTITUDE_DOMAINS
            .iter()
            .any(|(domain, _)| k.eq_ignore_ascii_case(domain))
    });

    let mut block = if test_based {
        serde_json::from_value::<AptitudeBlock>(json!({ "scores": value })).ok()?
    } else {
        let mut block = AptitudeBlock::default();
        for (task, raw) in map {
            let Some((_, domain)) = TASK_TO_DOMAIN.iter().find(|(t, _)| t == task) else {
                continue;
            };
            if !raw.is_object() {
                continue;
            }
            let ease = json_f64(raw, "ease").unwrap_or(0.0);
            let enjoyment = json_f64(raw, "enjoyment").unwrap_or(0.0);
            let average = (ease + enjoyment) / 2.0;

            let mut extra = Map::new();
            extra.insert("raw".to_string(), json!((average * 4.0).round()));
            extra.insert("ease".to_string(), json!(ease));
            extra.insert("enjoyment".to_string(), json!(enjoyment));
            block.scores.insert(
                domain.to_string(),
                DomainScore {
                    percentage: (average / 5.0 * 100.0).round(),
                    extra,
                    ..DomainScore::default()
                },
            );
        }
        if block.scores.is_empty() {
            return None;
        }
        block
    };

    block.top_strengths = block.ranked_strengths();
    block.overall_score = block.mean_positive_percentage();
    Some(block)
}

fn knowledge_from_columns(row: &ResultRow) -> Option<KnowledgeBlock> {
    let score = row.number("knowledge_score")?;
    let percentage = row.number("knowledge_percentage");
    let total_questions = percentage
        .filter(|p| *p > 0.0 && score > 0.0)
        .map(|p| (score / (p / 100.0)).round());

    let mut extra = Map::new();
    if let Some(details) = row.column("knowledge_details") {
        extra.insert("details".to_string(), details.clone());
    }

    Some(KnowledgeBlock {
        score: Some(score),
        percentage,
        total_questions,
        extra,
        ..KnowledgeBlock::default()
    })
}

fn employability_from_columns(row: &ResultRow) -> Option<EmployabilityBlock> {
    let score = row.number("employability_score");
    let readiness = row
        .column("employability_readiness")
        .and_then(|v| v.as_str())
        .map(String::from);
    let scores = row.column("employability_scores");

    if score.is_none() && readiness.is_none() && scores.is_none() {
        return None;
    }

    let mut extra = Map::new();
    if let Some(scores) = scores {
        extra.insert("scores".to_string(), scores.clone());
    }

    Some(EmployabilityBlock {
        score,
        level: readiness
            .clone()
            .or_else(|| score.map(|s| employability_level(s).to_string())),
        overall_readiness: readiness,
        extra,
    })
}

// =============================================================================
// Nested Analysis Helpers
// =============================================================================

#[derive(Debug, Default)]
struct Narrative {
    overall_summary: Option<Value>,
    career_fit: Option<Value>,
    skill_gap: Option<Value>,
    roadmap: Option<Value>,
}

fn narrative_from_nested(blob: &Value) -> Narrative {
    let analysis = blob.get("analysis");
    let overall_summary = analysis
        .and_then(|a| json_string(a, "interest_summary").or_else(|| json_string(a, "summary")))
        .or_else(|| json_string(blob, "summary"))
        .map(Value::String);

    let career_fit = blob
        .get("career_recommendations")
        .and_then(Value::as_array)
        .map(|recs| json!({ "clusters": nested_clusters(recs) }));

    Narrative {
        overall_summary,
        career_fit,
        skill_gap: blob
            .get("skill_development")
            .and_then(Value::as_array)
            .map(|items| json!({ "gaps": skill_gaps(items) })),
        roadmap: blob
            .get("next_steps")
            .and_then(Value::as_array)
            .map(|items| json!({ "steps": roadmap_steps(items) })),
    }
}

fn first_of(value: &Value, keys: &[&str]) -> Option<Value> {
    keys.iter()
        .find_map(|k| value.get(*k).filter(|v| !v.is_null()))
        .cloned()
}

fn nested_clusters(recs: &[Value]) -> Vec<Value> {
    recs.iter()
        .enumerate()
        .map(|(index, rec)| {
            json!({
                "title": first_of(rec, &["title", "name"]).unwrap_or_else(|| json!("Career Path")),
                "matchScore": first_of(rec, &["match_score", "matchScore"]).unwrap_or_else(|| json!(80)),
                "description": first_of(rec, &["reasoning", "description"]).unwrap_or_else(|| json!("")),
                "roles": first_of(rec, &["roles"]).unwrap_or_else(|| json!([])),
                "skills": first_of(rec, &["skills", "required_skills"]).unwrap_or_else(|| json!([])),
                "salary": first_of(rec, &["salary"]),
                "growthPotential": first_of(rec, &["growth_potential", "growthPotential"]).unwrap_or_else(|| json!("Medium")),
                "education": first_of(rec, &["education", "required_education"]),
                "index": index,
            })
        })
        .collect()
}

fn skill_gaps(items: &[Value]) -> Vec<Value> {
    items
        .iter()
        .map(|item| match item.as_str() {
            Some(skill) => json!({
                "skill": skill,
                "importance": "High",
                "developmentPath": format!(
                    "Focus on developing {} through courses, practice, and real-world projects.",
                    skill
                ),
                "resources": [],
            }),
            None => {
                let skill = first_of(item, &["name", "skill"]).unwrap_or(Value::Null);
                let path = first_of(item, &["developmentPath", "development_path"]).unwrap_or_else(|| {
                    json!(format!("Develop {}", skill.as_str().unwrap_or("this skill")))
                });
                json!({
                    "skill": skill,
                    "importance": first_of(item, &["importance"]).unwrap_or_else(|| json!("Medium")),
                    "developmentPath": path,
                    "resources": first_of(item, &["resources"]).unwrap_or_else(|| json!([])),
                })
            }
        })
        .collect()
}

fn roadmap_steps(items: &[Value]) -> Vec<Value> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| match item.as_str() {
            Some(step) => json!({
                "title": step,
                "description": step,
                "timeline": match index {
                    0 => "Immediate",
                    1 => "Short-term (1-3 months)",
                    _ => "Medium-term (3-6 months)",
                },
                "priority": if index == 0 { "High" } else { "Medium" },
                "resources": [],
            }),
            None => json!({
                "title": first_of(item, &["title", "name"]),
                "description": first_of(item, &["description", "details"]),
                "timeline": first_of(item, &["timeline"]).unwrap_or_else(|| json!("Short-term")),
                "priority": first_of(item, &["priority"]).unwrap_or_else(|| json!("Medium")),
                "resources": first_of(item, &["resources"]).unwrap_or_else(|| json!([])),
            }),
        })
        .collect()
}
