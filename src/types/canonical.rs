//! Canonical in-memory result shape.
//!
//! Every score block lives at exactly one path. Field names follow the AI
//! analysis JSON (camelCase), so a regenerated blob deserializes straight
//! into `CanonicalResult`. Anything the typed fields do not cover is kept in
//! the flattened `extra` maps and written back untouched.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use super::utils::{is_blank, value_as_f64};
use super::{AttemptId, ResultId, StudentId};

/// Default RIASEC ceiling: 10 items per type, at most 2 points each
pub const RIASEC_MAX_SCORE: f64 = 20.0;

// =============================================================================
// Lenient Deserializers
// =============================================================================

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(value_as_f64(&value).unwrap_or(0.0))
}

fn lenient_opt_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(value_as_f64(&value))
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(match value {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        _ => None,
    })
}

/// Accepts `["R","I","A"]`, `"RIA"`, or `"R, I, A"`.
fn lenient_string_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                Value::Object(map) => map.get("name").and_then(|n| n.as_str()).map(String::from),
                _ => None,
            })
            .collect(),
        Value::String(s) if s.contains(',') => s
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        Value::String(s) if s.chars().all(|c| RiasecType::from_char(c).is_some()) => {
            s.chars().map(String::from).collect()
        }
        Value::String(s) if !s.trim().is_empty() => vec![s],
        _ => Vec::new(),
    })
}

fn lenient_domain_scores<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<BTreeMap<String, DomainScore>, D::Error> {
    let value = Value::deserialize(d)?;
    let Value::Object(map) = value else {
        return Ok(BTreeMap::new());
    };
    Ok(map
        .into_iter()
        .filter_map(|(domain, raw)| {
            let score = match raw {
                Value::Object(_) => serde_json::from_value::<DomainScore>(raw).ok()?,
                other => DomainScore {
                    percentage: value_as_f64(&other)?,
                    ..DomainScore::default()
                },
            };
            Some((domain, score))
        })
        .collect())
}

fn is_false(b: &bool) -> bool {
    !*b
}

// =============================================================================
// RIASEC
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiasecType {
    R,
    I,
    A,
    S,
    E,
    C,
}

impl RiasecType {
    /// Canonical order, also the tie-break order when ranking
    pub const ALL: [RiasecType; 6] = [Self::R, Self::I, Self::A, Self::S, Self::E, Self::C];

    pub fn letter(&self) -> char {
        match self {
            Self::R => 'R',
            Self::I => 'I',
            Self::A => 'A',
            Self::S => 'S',
            Self::E => 'E',
            Self::C => 'C',
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::R => "Realistic",
            Self::I => "Investigative",
            Self::A => "Artistic",
            Self::S => "Social",
            Self::E => "Enterprising",
            Self::C => "Conventional",
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'R' => Some(Self::R),
            'I' => Some(Self::I),
            'A' => Some(Self::A),
            'S' => Some(Self::S),
            'E' => Some(Self::E),
            'C' => Some(Self::C),
            _ => None,
        }
    }

    /// Parse a letter or a full type name.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::from_char(c),
            _ => Self::ALL
                .into_iter()
                .find(|t| t.name().eq_ignore_ascii_case(s)),
        }
    }
}

impl fmt::Display for RiasecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RiasecScores {
    #[serde(rename = "R", alias = "r", alias = "Realistic", default, deserialize_with = "lenient_f64")]
    pub r: f64,
    #[serde(rename = "I", alias = "i", alias = "Investigative", default, deserialize_with = "lenient_f64")]
    pub i: f64,
    #[serde(rename = "A", alias = "a", alias = "Artistic", default, deserialize_with = "lenient_f64")]
    pub a: f64,
    #[serde(rename = "S", alias = "s", alias = "Social", default, deserialize_with = "lenient_f64")]
    pub s: f64,
    #[serde(rename = "E", alias = "e", alias = "Enterprising", default, deserialize_with = "lenient_f64")]
    pub e: f64,
    #[serde(rename = "C", alias = "c", alias = "Conventional", default, deserialize_with = "lenient_f64")]
    pub c: f64,
}

impl RiasecScores {
    pub fn get(&self, t: RiasecType) -> f64 {
        match t {
            RiasecType::R => self.r,
            RiasecType::I => self.i,
            RiasecType::A => self.a,
            RiasecType::S => self.s,
            RiasecType::E => self.e,
            RiasecType::C => self.c,
        }
    }

    pub fn set(&mut self, t: RiasecType, value: f64) {
        let slot = match t {
            RiasecType::R => &mut self.r,
            RiasecType::I => &mut self.i,
            RiasecType::A => &mut self.a,
            RiasecType::S => &mut self.s,
            RiasecType::E => &mut self.e,
            RiasecType::C => &mut self.c,
        };
        *slot = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = (RiasecType, f64)> + '_ {
        RiasecType::ALL.into_iter().map(|t| (t, self.get(t)))
    }

    /// All six scores are zero (or not numbers at all).
    pub fn is_degenerate(&self) -> bool {
        self.iter().all(|(_, v)| v.is_nan() || v <= 0.0)
    }

    pub fn max(&self) -> f64 {
        self.iter().map(|(_, v)| v).fold(0.0, f64::max)
    }

    /// Types ranked by score, highest first; ties keep R-I-A-S-E-C order.
    pub fn ranked(&self) -> Vec<RiasecType> {
        let mut types = RiasecType::ALL.to_vec();
        types.sort_by(|a, b| self.get(*b).total_cmp(&self.get(*a)));
        types
    }

    pub fn top_three(&self) -> Vec<RiasecType> {
        self.ranked().into_iter().take(3).collect()
    }

    pub fn code(&self) -> String {
        self.top_three().iter().map(RiasecType::letter).collect()
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiasecBlock {
    #[serde(default)]
    pub scores: RiasecScores,
    /// Pre-correction scores some writers kept alongside zeroed ones
    #[serde(
        rename = "_originalScores",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub original_scores: Option<RiasecScores>,
    #[serde(
        default,
        deserialize_with = "lenient_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_score: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub code: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_string_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub top_three: Vec<String>,
    #[serde(rename = "_corrected", default, skip_serializing_if = "is_false")]
    pub corrected: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RiasecBlock {
    pub fn with_scores(scores: RiasecScores) -> Self {
        Self {
            scores,
            ..Self::default()
        }
    }

    pub fn max_score_or_default(&self) -> f64 {
        self.max_score
            .filter(|m| *m > 0.0)
            .unwrap_or(RIASEC_MAX_SCORE)
    }
}

// =============================================================================
// Aptitude
// =============================================================================

/// Known aptitude domains with their default item counts
pub const APTITUDE_DOMAINS: [(&str, f64); 5] = [
    ("verbal", 8.0),
    ("numerical", 8.0),
    ("abstract", 8.0),
    ("spatial", 6.0),
    ("clerical", 20.0),
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainScore {
    #[serde(
        default,
        deserialize_with = "lenient_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub correct: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub total: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub percentage: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AptitudeBlock {
    #[serde(default, deserialize_with = "lenient_domain_scores")]
    pub scores: BTreeMap<String, DomainScore>,
    #[serde(
        default,
        deserialize_with = "lenient_string_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub top_strengths: Vec<String>,
    #[serde(
        default,
        deserialize_with = "lenient_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub overall_score: Option<f64>,
    #[serde(rename = "_corrected", default, skip_serializing_if = "is_false")]
    pub corrected: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AptitudeBlock {
    /// Up to three domains with a positive percentage, best first, capitalized.
    pub fn ranked_strengths(&self) -> Vec<String> {
        let mut ranked: Vec<(&String, f64)> = self
            .scores
            .iter()
            .map(|(domain, s)| (domain, s.percentage))
            .filter(|(_, pct)| *pct > 0.0)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
            .into_iter()
            .take(3)
            .map(|(domain, _)| super::utils::capitalize_first(domain))
            .collect()
    }

    /// Rounded mean of the positive domain percentages.
    pub fn mean_positive_percentage(&self) -> Option<f64> {
        let positive: Vec<f64> = self
            .scores
            .values()
            .map(|s| s.percentage)
            .filter(|p| *p > 0.0)
            .collect();
        if positive.is_empty() {
            return None;
        }
        Some((positive.iter().sum::<f64>() / positive.len() as f64).round())
    }
}

// =============================================================================
// Big Five
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BigFiveBlock {
    #[serde(rename = "O", alias = "openness", alias = "Openness", default, deserialize_with = "lenient_opt_f64", skip_serializing_if = "Option::is_none")]
    pub o: Option<f64>,
    #[serde(rename = "C", alias = "conscientiousness", alias = "Conscientiousness", default, deserialize_with = "lenient_opt_f64", skip_serializing_if = "Option::is_none")]
    pub c: Option<f64>,
    #[serde(rename = "E", alias = "extraversion", alias = "Extraversion", default, deserialize_with = "lenient_opt_f64", skip_serializing_if = "Option::is_none")]
    pub e: Option<f64>,
    #[serde(rename = "A", alias = "agreeableness", alias = "Agreeableness", default, deserialize_with = "lenient_opt_f64", skip_serializing_if = "Option::is_none")]
    pub a: Option<f64>,
    #[serde(rename = "N", alias = "neuroticism", alias = "Neuroticism", default, deserialize_with = "lenient_opt_f64", skip_serializing_if = "Option::is_none")]
    pub n: Option<f64>,
    #[serde(rename = "_corrected", default, skip_serializing_if = "is_false")]
    pub corrected: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BigFiveBlock {
    pub const TRAITS: [char; 5] = ['O', 'C', 'E', 'A', 'N'];

    pub fn get(&self, trait_letter: char) -> Option<f64> {
        match trait_letter {
            'O' => self.o,
            'C' => self.c,
            'E' => self.e,
            'A' => self.a,
            'N' => self.n,
            _ => None,
        }
    }

    pub fn set(&mut self, trait_letter: char, value: Option<f64>) {
        match trait_letter {
            'O' => self.o = value,
            'C' => self.c = value,
            'E' => self.e = value,
            'A' => self.a = value,
            'N' => self.n = value,
            _ => {}
        }
    }

    pub fn has_any(&self) -> bool {
        Self::TRAITS.iter().any(|t| self.get(*t).is_some())
    }
}

// =============================================================================
// Knowledge / Employability
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBlock {
    /// Percentage of stream questions answered correctly (0-100)
    #[serde(
        default,
        deserialize_with = "lenient_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub score: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub percentage: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub correct_count: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub total_questions: Option<f64>,
    #[serde(rename = "_corrected", default, skip_serializing_if = "is_false")]
    pub corrected: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployabilityBlock {
    #[serde(
        default,
        deserialize_with = "lenient_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub score: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub level: Option<String>,
    #[serde(
        default,
        alias = "readiness",
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub overall_readiness: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `High >= 80`, `Medium >= 60`, else `Developing`
pub fn employability_level(score: f64) -> &'static str {
    if score >= 80.0 {
        "High"
    } else if score >= 60.0 {
        "Medium"
    } else {
        "Developing"
    }
}

// =============================================================================
// Canonical Result
// =============================================================================

/// Which stored shape a canonical result was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResultSource {
    /// Complete AI analysis blob
    #[serde(rename = "gemini_results_complete")]
    AiBlob,
    /// Individual score columns without any blob
    #[serde(rename = "individual_columns")]
    LegacyColumns,
    /// Score columns merged with an older nested analysis blob
    #[serde(rename = "all_columns")]
    NestedAnalysis,
    /// Blob present but unreadable; rebuilt from columns
    #[default]
    #[serde(rename = "fallback")]
    Fallback,
}

impl fmt::Display for ResultSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&super::utils::enum_to_str(self))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalResult {
    #[serde(rename = "_transformed", default)]
    pub transformed: bool,
    #[serde(rename = "_source", default)]
    pub source: ResultSource,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ResultId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<AttemptId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<StudentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade_level: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub riasec: Option<RiasecBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aptitude: Option<AptitudeBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub big_five: Option<BigFiveBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_values: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employability: Option<EmployabilityBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge: Option<KnowledgeBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strengths: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub career_fit: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill_gap: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roadmap: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_snapshot: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing_analysis: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_note: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_summary: Option<Value>,

    /// Older nested analysis blob kept for fields the columns lack
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gemini_results: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CanonicalResult {
    /// Core interest scores exist and are not all zero.
    pub fn has_core_scores(&self) -> bool {
        self.riasec
            .as_ref()
            .is_some_and(|r| !r.scores.is_degenerate())
    }

    /// Report sections counted for completeness, with their presence.
    pub fn sections(&self) -> [(&'static str, bool); 11] {
        fn present(v: &Option<Value>) -> bool {
            v.as_ref().is_some_and(|v| !is_blank(v))
        }
        [
            ("riasec", self.riasec.is_some()),
            ("strengths", present(&self.strengths)),
            ("aptitude", self.aptitude.as_ref().is_some_and(|a| !a.scores.is_empty())),
            ("bigFive", self.big_five.as_ref().is_some_and(BigFiveBlock::has_any)),
            ("workValues", present(&self.work_values)),
            ("knowledge", self.knowledge.as_ref().is_some_and(|k| k.score.is_some())),
            ("employability", self.employability.is_some()),
            ("overallSummary", present(&self.overall_summary)),
            ("careerFit", present(&self.career_fit)),
            ("skillGap", present(&self.skill_gap)),
            ("roadmap", present(&self.roadmap)),
        ]
    }

    /// Percentage of report sections present, rounded.
    pub fn completeness(&self) -> u8 {
        let sections = self.sections();
        let present = sections.iter().filter(|(_, p)| *p).count();
        ((present as f64 / sections.len() as f64) * 100.0).round() as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_riasec_scores_lenient() {
        let scores: RiasecScores =
            serde_json::from_value(json!({"R": "12", "i": 9, "Artistic": 3, "S": null})).unwrap();
        assert_eq!(scores.r, 12.0);
        assert_eq!(scores.i, 9.0);
        assert_eq!(scores.a, 3.0);
        assert_eq!(scores.s, 0.0);
        assert!(!scores.is_degenerate());
        assert!(RiasecScores::default().is_degenerate());
    }

    #[test]
    fn test_ranking_ties_keep_canonical_order() {
        let scores = RiasecScores {
            r: 5.0,
            i: 9.0,
            a: 5.0,
            s: 9.0,
            e: 1.0,
            c: 0.0,
        };
        assert_eq!(
            scores.top_three(),
            vec![RiasecType::I, RiasecType::S, RiasecType::R]
        );
        assert_eq!(scores.code(), "ISR");
    }

    #[test]
    fn test_top_three_from_string() {
        let block: RiasecBlock =
            serde_json::from_value(json!({"scores": {"R": 1}, "topThree": "SIA"})).unwrap();
        assert_eq!(block.top_three, vec!["S", "I", "A"]);
    }

    #[test]
    fn test_aptitude_scores_accept_numbers() {
        let block: AptitudeBlock = serde_json::from_value(json!({
            "scores": {"verbal": {"correct": 6, "total": 8, "percentage": 75}, "numerical": 50}
        }))
        .unwrap();
        assert_eq!(block.scores["verbal"].correct, Some(6.0));
        assert_eq!(block.scores["numerical"].percentage, 50.0);
    }

    #[test]
    fn test_canonical_keeps_unknown_fields() {
        let value = json!({
            "riasec": {"scores": {"R": 4}, "interpretation": "hands-on"},
            "streamRecommendation": {"stream": "PCM"},
            "overallSummary": "Good"
        });
        let result: CanonicalResult = serde_json::from_value(value).unwrap();
        assert_eq!(result.extra["streamRecommendation"]["stream"], "PCM");
        let riasec = result.riasec.as_ref().unwrap();
        assert_eq!(riasec.extra["interpretation"], "hands-on");

        let back = serde_json::to_value(&result).unwrap();
        assert_eq!(back["riasec"]["interpretation"], "hands-on");
        assert_eq!(back["streamRecommendation"]["stream"], "PCM");
    }

    #[test]
    fn test_source_serializes_as_tag() {
        assert_eq!(ResultSource::AiBlob.to_string(), "gemini_results_complete");
        assert_eq!(ResultSource::LegacyColumns.to_string(), "individual_columns");
    }

    #[test]
    fn test_completeness() {
        let mut result = CanonicalResult::default();
        assert_eq!(result.completeness(), 0);
        result.riasec = Some(RiasecBlock::with_scores(RiasecScores {
            r: 1.0,
            ..Default::default()
        }));
        result.overall_summary = Some(json!("Summary"));
        result.career_fit = Some(json!({}));
        assert_eq!(result.completeness(), 18);
    }

    #[test]
    fn test_employability_level() {
        assert_eq!(employability_level(85.0), "High");
        assert_eq!(employability_level(60.0), "Medium");
        assert_eq!(employability_level(12.0), "Developing");
    }
}
