//! Career catalogue used to expand plain career titles into clusters.
//!
//! Legacy rows stored `career_recommendations` as a list of titles. Each known
//! title is expanded with roles, skills, salary band, and a RIASEC alignment
//! used to estimate the match score.

use serde_json::{Value, json};

use crate::types::{RiasecScores, RiasecType};

/// Match score when the student has no interest scores to compare against
const DEFAULT_MATCH_SCORE: f64 = 80.0;

/// Three weighted codes against a 0-20 scale per type
const MAX_WEIGHTED_SCORE: f64 = 20.0 * 6.0;

/// Each lower-ranked title loses this many points
const RANK_PENALTY: f64 = 5.0;

struct CareerProfile {
    title: &'static str,
    roles: &'static [&'static str],
    skills: &'static [&'static str],
    salary_lpa: (u32, u32),
    growth: &'static str,
    education: &'static str,
    riasec: [RiasecType; 3],
}

use RiasecType::{A, C, E, I, R, S};

const CATALOGUE: &[CareerProfile] = &[
    CareerProfile {
        title: "Software Engineer",
        roles: &["Backend Developer", "Frontend Developer", "Full Stack Developer", "DevOps Engineer"],
        skills: &["JavaScript", "Python", "React", "Node.js", "Git", "SQL"],
        salary_lpa: (8, 25),
        growth: "Excellent",
        education: "Bachelor's in Computer Science or related field",
        riasec: [I, R, C],
    },
    CareerProfile {
        title: "Data Scientist",
        roles: &["Data Analyst", "ML Engineer", "Business Intelligence Analyst", "Research Scientist"],
        skills: &["Python", "R", "SQL", "Machine Learning", "Statistics", "Data Visualization"],
        salary_lpa: (10, 30),
        growth: "Excellent",
        education: "Bachelor's/Master's in Data Science, Statistics, or Computer Science",
        riasec: [I, C, R],
    },
    CareerProfile {
        title: "UX Designer",
        roles: &["UI Designer", "Product Designer", "Interaction Designer", "UX Researcher"],
        skills: &["Figma", "Adobe XD", "User Research", "Prototyping", "Wireframing", "Design Thinking"],
        salary_lpa: (6, 20),
        growth: "High",
        education: "Bachelor's in Design, HCI, or related field",
        riasec: [A, I, E],
    },
    CareerProfile {
        title: "Marketing Manager",
        roles: &["Digital Marketing Manager", "Brand Manager", "Content Strategist", "SEO Specialist"],
        skills: &["Digital Marketing", "SEO", "Content Strategy", "Analytics", "Social Media", "Communication"],
        salary_lpa: (7, 22),
        growth: "High",
        education: "Bachelor's in Marketing, Business, or Communications",
        riasec: [E, A, S],
    },
    CareerProfile {
        title: "Financial Analyst",
        roles: &["Investment Analyst", "Risk Analyst", "Budget Analyst", "Portfolio Manager"],
        skills: &["Financial Modeling", "Excel", "SQL", "Data Analysis", "Accounting", "Economics"],
        salary_lpa: (8, 25),
        growth: "High",
        education: "Bachelor's in Finance, Economics, or Accounting",
        riasec: [C, E, I],
    },
    CareerProfile {
        title: "Teacher",
        roles: &["School Teacher", "College Professor", "Curriculum Developer", "Education Consultant"],
        skills: &["Communication", "Curriculum Design", "Classroom Management", "Subject Expertise", "Patience"],
        salary_lpa: (4, 15),
        growth: "Medium",
        education: "Bachelor's in Education or subject-specific degree with B.Ed",
        riasec: [S, A, I],
    },
    CareerProfile {
        title: "Mechanical Engineer",
        roles: &["Design Engineer", "Manufacturing Engineer", "Quality Engineer", "Project Engineer"],
        skills: &["CAD", "SolidWorks", "Manufacturing", "Thermodynamics", "Materials Science", "Problem Solving"],
        salary_lpa: (6, 18),
        growth: "High",
        education: "Bachelor's in Mechanical Engineering",
        riasec: [R, I, C],
    },
    CareerProfile {
        title: "Nurse",
        roles: &["Registered Nurse", "Clinical Nurse", "Nurse Practitioner", "Nursing Supervisor"],
        skills: &["Patient Care", "Medical Knowledge", "Communication", "Empathy", "Critical Thinking"],
        salary_lpa: (3, 12),
        growth: "Medium",
        education: "Bachelor's in Nursing (B.Sc Nursing)",
        riasec: [S, I, R],
    },
];

fn lookup(title: &str) -> Option<&'static CareerProfile> {
    CATALOGUE.iter().find(|c| c.title == title)
}

/// `min(100, round(weighted / 120 * 100) + 50)`; weights 3, 2, 1 by code rank.
fn match_score(codes: &[RiasecType], scores: Option<&RiasecScores>) -> f64 {
    let Some(scores) = scores else {
        return DEFAULT_MATCH_SCORE;
    };
    let weighted: f64 = codes
        .iter()
        .enumerate()
        .map(|(rank, code)| scores.get(*code) * (3 - rank) as f64)
        .sum();
    ((weighted / MAX_WEIGHTED_SCORE * 100.0).round() + 50.0).min(100.0)
}

/// Expand stored recommendations into career-fit clusters.
///
/// Titles are matched against the catalogue; unknown titles get empty detail
/// lists. Objects are kept as-is apart from an `index` field.
pub fn enrich_recommendations(items: &[Value], scores: Option<&RiasecScores>) -> Vec<Value> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let Some(title) = item.as_str() else {
                let mut cluster = item.clone();
                if let Some(map) = cluster.as_object_mut() {
                    map.entry("index").or_insert(json!(index));
                }
                return cluster;
            };

            let profile = lookup(title);
            let codes = profile.map(|p| p.riasec.as_slice()).unwrap_or(&[]);
            let score = match_score(codes, scores) - index as f64 * RANK_PENALTY;

            json!({
                "title": title,
                "matchScore": score,
                "description": format!("{} role aligns with your interests and skills.", title),
                "roles": profile.map(|p| p.roles.to_vec()).unwrap_or_default(),
                "skills": profile.map(|p| p.skills.to_vec()).unwrap_or_default(),
                "salary": profile.map(|p| json!({
                    "min": p.salary_lpa.0,
                    "max": p.salary_lpa.1,
                    "currency": "LPA",
                })),
                "growthPotential": profile.map(|p| p.growth).unwrap_or("Medium"),
                "education": profile.map(|p| p.education).unwrap_or("Relevant degree required"),
                "index": index,
            })
        })
        .collect()
}
