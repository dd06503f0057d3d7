//! Prompt Builder
//!
//! Sectioned prompt construction for analysis regeneration. The assessment
//! prompt itself lives in [`assessment`].

mod assessment;

pub use assessment::{AssessmentData, analysis_prompt, format_duration};

/// Prompt section types
#[derive(Debug, Clone)]
pub enum PromptSection {
    /// Role definition with expertise area
    Role { expertise: String, task: String },
    /// Numbered rules the model must follow
    Rules { title: String, rules: Vec<String> },
    /// Raw text section with optional header
    Text {
        header: Option<String>,
        content: String,
    },
    /// Fenced block with language tag
    Code { language: String, content: String },
}

#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    sections: Vec<PromptSection>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(mut self, expertise: &str, task: &str) -> Self {
        self.sections.push(PromptSection::Role {
            expertise: expertise.to_string(),
            task: task.to_string(),
        });
        self
    }

    pub fn rules(mut self, title: &str, rules: Vec<String>) -> Self {
        self.sections.push(PromptSection::Rules {
            title: title.to_string(),
            rules,
        });
        self
    }

    pub fn text(mut self, content: &str) -> Self {
        self.sections.push(PromptSection::Text {
            header: None,
            content: content.to_string(),
        });
        self
    }

    pub fn section(mut self, header: &str, content: &str) -> Self {
        self.sections.push(PromptSection::Text {
            header: Some(header.to_string()),
            content: content.to_string(),
        });
        self
    }

    pub fn code(mut self, language: &str, content: &str) -> Self {
        self.sections.push(PromptSection::Code {
            language: language.to_string(),
            content: content.to_string(),
        });
        self
    }

    pub fn build(self) -> String {
        let mut prompt = String::new();

        for section in self.sections {
            match section {
                PromptSection::Role { expertise, task } => {
                    prompt.push_str(&format!("You are a {}. {}\n\n", expertise, task));
                }
                PromptSection::Rules { title, rules } => {
                    prompt.push_str(&format!("## {}:\n", title));
                    for rule in rules {
                        prompt.push_str(&format!("- {}\n", rule));
                    }
                    prompt.push('\n');
                }
                PromptSection::Text { header, content } => {
                    if let Some(h) = header {
                        prompt.push_str(&format!("## {}\n", h));
                    }
                    prompt.push_str(&content);
                    prompt.push_str("\n\n");
                }
                PromptSection::Code { language, content } => {
                    prompt.push_str(&format!("```{}\n", language));
                    prompt.push_str(&content);
                    prompt.push_str("\n```\n\n");
                }
            }
        }

        prompt.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_render_in_order() {
        let prompt = PromptBuilder::new()
            .role("career counselor", "Analyze the data.")
            .rules("SCORING", vec!["Response 4 = 1 point".to_string()])
            .section("Stream", "SCIENCE")
            .code("json", "{}")
            .build();

        let role = prompt.find("career counselor").unwrap();
        let rules = prompt.find("## SCORING:\n- Response 4 = 1 point").unwrap();
        let stream = prompt.find("## Stream\nSCIENCE").unwrap();
        let code = prompt.find("```json\n{}\n```").unwrap();
        assert!(role < rules && rules < stream && stream < code);
    }

    #[test]
    fn test_output_is_trimmed() {
        let prompt = PromptBuilder::new().text("only").build();
        assert_eq!(prompt, "only");
    }
}
