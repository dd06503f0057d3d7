//! Deterministic analysis prompt for one assessment attempt.
//!
//! Answers are joined with their question metadata, aptitude and SJT items are
//! pre-scored, and section timings are summarized so the model only has to
//! aggregate and interpret.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::PromptBuilder;
use crate::constants::timing;
use crate::types::canonical::APTITUDE_DOMAINS;
use crate::types::record::answers_match;
use crate::types::{AnswerSection, Answers, GradeLevel, QuestionBank};

const EMPLOYABILITY_DOMAINS: [&str; 8] = [
    "Communication",
    "Teamwork",
    "ProblemSolving",
    "Adaptability",
    "Leadership",
    "DigitalFluency",
    "Professionalism",
    "CareerReadiness",
];

// =============================================================================
// Prepared Assessment Data
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct RatedAnswer {
    pub question: String,
    pub answer: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredAnswer {
    pub question_id: String,
    pub question: String,
    pub student_answer: Value,
    pub correct_answer: Value,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SjtAnswer {
    pub scenario: String,
    pub student_best_choice: Value,
    pub student_worst_choice: Value,
    pub best_correct: bool,
    pub worst_correct: bool,
    /// Best answer 2, worst answer 0, anything else 1
    pub score: u8,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CorrectTotal {
    pub correct: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionTiming {
    pub label: &'static str,
    pub seconds: f64,
    pub questions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_secs: Option<u64>,
}

impl SectionTiming {
    fn avg_per_question(&self) -> u64 {
        if self.seconds <= 0.0 || self.questions == 0 {
            return 0;
        }
        (self.seconds / self.questions as f64).round() as u64
    }

    fn render(&self) -> String {
        let allowed = match self.limit_secs {
            Some(limit) => format!(" of {} allowed", format_duration(limit as f64)),
            None => String::new(),
        };
        format!(
            "- {}: {}{} ({} questions, avg {}s per question)",
            self.label,
            format_duration(self.seconds),
            allowed,
            self.questions,
            self.avg_per_question()
        )
    }
}

/// Everything the model sees about one attempt
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentData {
    pub stream: String,
    pub riasec_answers: BTreeMap<String, RatedAnswer>,
    pub aptitude_answers: BTreeMap<String, Vec<ScoredAnswer>>,
    pub aptitude_scores: BTreeMap<String, CorrectTotal>,
    pub big_five_answers: BTreeMap<String, RatedAnswer>,
    pub work_values_answers: BTreeMap<String, RatedAnswer>,
    pub self_rating: BTreeMap<String, Vec<RatedAnswer>>,
    pub sjt: Vec<SjtAnswer>,
    pub knowledge_answers: BTreeMap<String, ScoredAnswer>,
    pub total_knowledge_questions: usize,
    pub timings: Vec<SectionTiming>,
    pub total_seconds: f64,
}

fn rated(
    answers: &Answers,
    bank: &QuestionBank,
    section: AnswerSection,
) -> BTreeMap<String, RatedAnswer> {
    answers
        .section(section)
        .filter_map(|(id, value)| {
            let q = bank.find(section, id)?;
            Some((
                id.to_string(),
                RatedAnswer {
                    question: q.text.clone(),
                    answer: value.clone(),
                },
            ))
        })
        .collect()
}

fn scored(
    answers: &Answers,
    bank: &QuestionBank,
    section: AnswerSection,
) -> Vec<(Option<String>, ScoredAnswer)> {
    answers
        .section(section)
        .filter_map(|(id, value)| {
            let q = bank.find(section, id)?;
            let key = q.correct_answer.clone().unwrap_or(Value::Null);
            Some((
                q.subtype.as_ref().map(|s| s.to_lowercase()),
                ScoredAnswer {
                    question_id: id.to_string(),
                    question: q.text.clone(),
                    is_correct: !key.is_null() && answers_match(value, &key),
                    student_answer: value.clone(),
                    correct_answer: key,
                },
            ))
        })
        .collect()
}

impl AssessmentData {
    /// Join answers with question metadata. Answers without a matching
    /// question are dropped.
    pub fn prepare(
        answers: &Answers,
        stream: Option<&str>,
        bank: &QuestionBank,
        section_timings: &BTreeMap<String, f64>,
    ) -> Self {
        let bank = bank.for_stream(stream);

        let mut aptitude_answers: BTreeMap<String, Vec<ScoredAnswer>> = APTITUDE_DOMAINS
            .iter()
            .map(|(d, _)| (d.to_string(), Vec::new()))
            .collect();
        for (domain, answer) in scored(answers, &bank, AnswerSection::Aptitude) {
            if let Some(list) = domain.and_then(|d| aptitude_answers.get_mut(&d)) {
                list.push(answer);
            }
        }
        let aptitude_scores = aptitude_answers
            .iter()
            .map(|(d, list)| {
                let tally = CorrectTotal {
                    correct: list.iter().filter(|a| a.is_correct).count(),
                    total: list.len(),
                };
                (d.clone(), tally)
            })
            .collect();

        let mut self_rating: BTreeMap<String, Vec<RatedAnswer>> = EMPLOYABILITY_DOMAINS
            .iter()
            .map(|d| (d.to_string(), Vec::new()))
            .collect();
        let mut sjt = Vec::new();
        for (id, value) in answers.section(AnswerSection::Employability) {
            let Some(q) = bank.find(AnswerSection::Employability, id) else {
                continue;
            };
            match q.part_type.as_deref() {
                Some("sjt") => sjt.push(score_sjt(&q.text, value, q.best_answer.as_ref(), q.worst_answer.as_ref())),
                _ => {
                    if let Some(list) = q.subtype.as_ref().and_then(|d| self_rating.get_mut(d)) {
                        list.push(RatedAnswer {
                            question: q.text.clone(),
                            answer: value.clone(),
                        });
                    }
                }
            }
        }

        let knowledge_answers: BTreeMap<String, ScoredAnswer> =
            scored(answers, &bank, AnswerSection::Knowledge)
                .into_iter()
                .map(|(_, a)| (a.question_id.clone(), a))
                .collect();
        let total_knowledge_questions = bank.section(AnswerSection::Knowledge).count();

        let timing_for = |section: AnswerSection, label: &'static str, limit: Option<u64>| {
            let questions = match section {
                AnswerSection::Knowledge => total_knowledge_questions,
                other => bank.section(other).count(),
            };
            SectionTiming {
                label,
                seconds: section_timings.get(section.name()).copied().unwrap_or(0.0),
                questions,
                limit_secs: limit,
            }
        };
        let timings = vec![
            timing_for(AnswerSection::Riasec, "RIASEC (Career Interests)", None),
            timing_for(
                AnswerSection::Aptitude,
                "Multi-Aptitude Battery",
                Some(timing::APTITUDE_LIMIT_SECS),
            ),
            timing_for(AnswerSection::Bigfive, "Big Five (Personality)", None),
            timing_for(AnswerSection::Values, "Work Values", None),
            timing_for(AnswerSection::Employability, "Employability Skills", None),
            timing_for(
                AnswerSection::Knowledge,
                "Knowledge Test",
                Some(timing::KNOWLEDGE_LIMIT_SECS),
            ),
        ];
        let total_seconds = section_timings.values().filter(|s| **s > 0.0).sum();

        Self {
            stream: stream.unwrap_or("general").to_string(),
            riasec_answers: rated(answers, &bank, AnswerSection::Riasec),
            aptitude_answers,
            aptitude_scores,
            big_five_answers: rated(answers, &bank, AnswerSection::Bigfive),
            work_values_answers: rated(answers, &bank, AnswerSection::Values),
            self_rating,
            sjt,
            knowledge_answers,
            total_knowledge_questions,
            timings,
            total_seconds,
        }
    }

    /// Stable fingerprint of the prepared data, quoted in the prompt so that
    /// identical inputs produce identical prompts.
    pub fn session_hash(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
    }
}

fn score_sjt(text: &str, answer: &Value, best: Option<&Value>, worst: Option<&Value>) -> SjtAnswer {
    let chosen_best = answer.get("best").cloned().unwrap_or_else(|| answer.clone());
    let chosen_worst = answer.get("worst").cloned().unwrap_or(Value::Null);
    let hits = |choice: &Value, key: Option<&Value>| key.is_some_and(|k| answers_match(choice, k));

    let score = if hits(&chosen_best, worst) {
        0
    } else if hits(&chosen_best, best) {
        2
    } else {
        1
    };

    SjtAnswer {
        scenario: text.to_string(),
        best_correct: hits(&chosen_best, best),
        worst_correct: hits(&chosen_worst, worst),
        student_best_choice: chosen_best,
        student_worst_choice: chosen_worst,
        score,
    }
}

/// `95` → "1 minute 35 seconds"; zero or negative → "Not recorded".
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.round() as i64;
    if total <= 0 {
        return "Not recorded".to_string();
    }
    let (mins, secs) = (total / 60, total % 60);
    let plural = |n: i64| if n > 1 { "s" } else { "" };
    match (mins, secs) {
        (0, s) => format!("{} seconds", s),
        (m, 0) => format!("{} minute{}", m, plural(m)),
        (m, s) => format!("{} minute{} {} second{}", m, plural(m), s, plural(s)),
    }
}

// =============================================================================
// Prompt
// =============================================================================

const ANALYSIS_STRUCTURE: &str = r#"{
  "profileSnapshot": {
    "keyPatterns": {"enjoyment": "", "strength": "", "workStyle": "", "motivation": ""},
    "aptitudeStrengths": [{"name": "", "percentile": ""}]
  },
  "riasec": {
    "scores": {"R": 0, "I": 0, "A": 0, "S": 0, "E": 0, "C": 0},
    "maxScore": 20,
    "code": "<3 letters with the highest scores, highest first>",
    "topThree": ["", "", ""],
    "interpretation": ""
  },
  "aptitude": {
    "scores": {
      "verbal": {"correct": 0, "total": 8, "percentage": 0},
      "numerical": {"correct": 0, "total": 8, "percentage": 0},
      "abstract": {"correct": 0, "total": 8, "percentage": 0},
      "spatial": {"correct": 0, "total": 6, "percentage": 0},
      "clerical": {"correct": 0, "total": 20, "percentage": 0}
    },
    "overallScore": 0,
    "topStrengths": ["", ""],
    "areasToImprove": [""],
    "cognitiveProfile": ""
  },
  "bigFive": {"O": 0, "C": 0, "E": 0, "A": 0, "N": 0, "dominantTraits": [], "workStyleSummary": ""},
  "workValues": {"scores": {}, "topThree": [{"value": "", "score": 0}], "motivationSummary": ""},
  "employability": {
    "skillScores": {},
    "sjtScore": 0,
    "overallReadiness": "<High/Medium/Low>",
    "strengthAreas": [],
    "improvementAreas": []
  },
  "knowledge": {"score": 0, "correctCount": 0, "totalQuestions": 0, "strongTopics": [], "weakTopics": []},
  "careerFit": {
    "clusters": [{"title": "", "fit": "<High/Medium/Explore>", "matchScore": 0, "roles": {"entry": [], "mid": []}}]
  },
  "skillGap": {"priorityA": [{"skill": "", "currentLevel": 0, "targetLevel": 0}], "priorityB": []},
  "roadmap": {"projects": [{"title": "", "purpose": ""}], "internship": {}, "exposure": {}},
  "timingAnalysis": {"overallPace": "", "decisionStyle": "", "insights": []},
  "finalNote": {"advantage": "", "growthFocus": ""},
  "overallSummary": ""
}"#;

fn scoring_rules() -> Vec<String> {
    [
        "Response 1, 2 or 3: 0 points",
        "Response 4 (Like): 1 point",
        "Response 5 (Strongly Like): 2 points",
        "Maximum score per type = 20",
        "Aptitude: each correct answer = 1 point; percentage = round(correct / total * 100)",
        "Knowledge: score = round(correct / total * 100)",
        "Big Five: each trait is the mean of its 1-5 responses, one decimal",
        "Employability: average each domain; strengths avg >= 4, improvement areas avg <= 2.5",
        "SJT: best answer 2 points, worst answer 0 points, other answers 1 point",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn pretty(value: &impl Serialize) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

/// Build the regeneration prompt.
///
/// `prior_scores` are previously stored blocks the model may reuse when the
/// answers do not contradict them; `student_context` is free-form profile data.
pub fn analysis_prompt(
    data: &AssessmentData,
    grade: GradeLevel,
    prior_scores: Option<&Value>,
    student_context: Option<&Value>,
) -> String {
    let aptitude_summary = APTITUDE_DOMAINS
        .iter()
        .map(|(domain, default_total)| {
            let tally = data.aptitude_scores.get(*domain).copied().unwrap_or_default();
            let total = if tally.total > 0 { tally.total as f64 } else { *default_total };
            format!("- {}: {}/{} correct", domain, tally.correct, total)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut timing_lines: Vec<String> = data.timings.iter().map(SectionTiming::render).collect();
    timing_lines.push(format!(
        "- TOTAL ASSESSMENT TIME: {}",
        format_duration(data.total_seconds)
    ));

    let mut builder = PromptBuilder::new()
        .role(
            "career counselor and psychometric assessment expert",
            "Analyze the following student assessment data and provide comprehensive results.",
        )
        .rules(
            "CONSISTENCY REQUIREMENT",
            vec![
                "Use ONLY the provided data; do not introduce randomness".to_string(),
                "Calculate scores with the exact formulas below".to_string(),
                "Derive career recommendations directly from the calculated scores".to_string(),
                format!("Session ID for consistency verification: {}", data.session_hash()),
            ],
        )
        .section(
            "Student",
            &format!("Stream: {}\nGrade level: {}", data.stream.to_uppercase(), grade),
        );

    if let Some(context) = student_context.filter(|v| !v.is_null()) {
        builder = builder.section("Student Context", &pretty(context));
    }

    builder = builder
        .section(
            "RIASEC Career Interest Responses (1-5 scale)",
            &pretty(&data.riasec_answers),
        )
        .section(
            "Multi-Aptitude Battery (pre-scored)",
            &format!("{}\n\n{}", aptitude_summary, pretty(&data.aptitude_answers)),
        )
        .section("Big Five Personality Responses (1-5 scale)", &pretty(&data.big_five_answers))
        .section("Work Values Responses (1-5 scale)", &pretty(&data.work_values_answers))
        .section("Employability Self-Rating (1-5 scale)", &pretty(&data.self_rating))
        .section("Situational Judgement Test", &pretty(&data.sjt))
        .section(
            "Stream Knowledge Test",
            &format!(
                "{}\nTotal Questions: {}",
                pretty(&data.knowledge_answers),
                data.total_knowledge_questions
            ),
        )
        .section("Section Timing", &timing_lines.join("\n"))
        .rules("SCORING RULES", scoring_rules());

    if let Some(prior) = prior_scores.filter(|v| !v.is_null()) {
        builder = builder.section(
            "Previously Stored Scores (recompute if the answers disagree)",
            &pretty(prior),
        );
    }

    builder
        .text("Return ONLY a valid JSON object with this exact structure:")
        .code("json", ANALYSIS_STRUCTURE)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Question;
    use serde_json::json;

    fn question(section: AnswerSection, id: &str, subtype: &str) -> Question {
        Question {
            id: id.to_string(),
            section,
            subtype: Some(subtype.to_string()),
            text: format!("Question {}", id),
            correct_answer: None,
            part_type: None,
            best_answer: None,
            worst_answer: None,
            stream: None,
        }
    }

    fn fixture() -> (Answers, QuestionBank) {
        let mut apt = question(AnswerSection::Aptitude, "a1", "verbal");
        apt.correct_answer = Some(json!("B"));
        let mut sjt = question(AnswerSection::Employability, "e2", "Teamwork");
        sjt.part_type = Some("sjt".to_string());
        sjt.best_answer = Some(json!("A"));
        sjt.worst_answer = Some(json!("D"));

        let bank = QuestionBank::new(vec![
            question(AnswerSection::Riasec, "r1", "I"),
            apt,
            question(AnswerSection::Employability, "e1", "Teamwork"),
            sjt,
        ]);

        let mut answers = Answers::default();
        answers.insert(AnswerSection::Riasec, "r1", json!(5));
        answers.insert(AnswerSection::Riasec, "unknown", json!(4));
        answers.insert(AnswerSection::Aptitude, "a1", json!("b"));
        answers.insert(AnswerSection::Employability, "e1", json!(4));
        answers.insert(AnswerSection::Employability, "e2", json!({"best": "A", "worst": "D"}));
        (answers, bank)
    }

    #[test]
    fn test_prepare_joins_and_scores() {
        let (answers, bank) = fixture();
        let timings = BTreeMap::from([("aptitude".to_string(), 300.0)]);
        let data = AssessmentData::prepare(&answers, Some("science"), &bank, &timings);

        assert_eq!(data.riasec_answers.len(), 1);
        assert_eq!(data.aptitude_scores["verbal"].correct, 1);
        assert_eq!(data.self_rating["Teamwork"].len(), 1);
        assert_eq!(data.sjt[0].score, 2);
        assert!(data.sjt[0].worst_correct);
        assert_eq!(data.total_seconds, 300.0);
    }

    #[test]
    fn test_sjt_choosing_worst_scores_zero() {
        let sjt = score_sjt("s", &json!("D"), Some(&json!("A")), Some(&json!("D")));
        assert_eq!(sjt.score, 0);
        let other = score_sjt("s", &json!("B"), Some(&json!("A")), Some(&json!("D")));
        assert_eq!(other.score, 1);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.0), "Not recorded");
        assert_eq!(format_duration(45.0), "45 seconds");
        assert_eq!(format_duration(60.0), "1 minute");
        assert_eq!(format_duration(600.0), "10 minutes");
        assert_eq!(format_duration(95.0), "1 minute 35 seconds");
        assert_eq!(format_duration(121.0), "2 minutes 1 second");
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let (answers, bank) = fixture();
        let data = AssessmentData::prepare(&answers, Some("science"), &bank, &BTreeMap::new());
        let first = analysis_prompt(&data, GradeLevel::After12, None, None);
        let second = analysis_prompt(&data, GradeLevel::After12, None, None);
        assert_eq!(first, second);
        assert!(first.contains("Stream: SCIENCE"));
        assert!(first.contains("verbal: 1/1 correct"));
        assert!(first.contains("of 10 minutes allowed"));
        assert!(first.contains("\"overallSummary\""));
    }

    #[test]
    fn test_prompt_includes_prior_scores_when_given() {
        let (answers, bank) = fixture();
        let data = AssessmentData::prepare(&answers, None, &bank, &BTreeMap::new());
        let prior = json!({"riasec": {"scores": {"I": 12}}});
        let prompt = analysis_prompt(&data, GradeLevel::College, Some(&prior), None);
        assert!(prompt.contains("Previously Stored Scores"));
        assert!(prompt.contains("Stream: GENERAL"));
    }
}
