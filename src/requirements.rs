//! Requirements drafting: one-off file analysis and persona question generation.

use serde::{Deserialize, Serialize};

use crate::analysis::BatchAnalyzer;
use crate::error::{ServiceError, ServiceResult};
use crate::extract::extract;
use crate::llm::{GenerativeModel, Prompt};
use crate::models::DocumentText;

/// Analyses an uploaded file without storing it.
pub async fn analyze_file(
    analyzer: &BatchAnalyzer,
    file_name: &str,
    bytes: &[u8],
) -> ServiceResult<String> {
    let extraction = extract(bytes, file_name)?;
    if extraction.text.trim().is_empty() {
        return Err(ServiceError::Validation(
            "no text could be extracted from the file".into(),
        ));
    }

    let mut results = analyzer
        .analyze_batch(vec![DocumentText {
            id: file_name.to_string(),
            text: extraction.text,
        }])
        .await;

    match results.pop() {
        Some(result) if result.is_success() => Ok(result.analysis),
        Some(result) => Err(ServiceError::Upstream(
            result.error.unwrap_or_else(|| "file analysis failed".into()),
        )),
        None => Err(ServiceError::Upstream("file analysis failed".into())),
    }
}

fn default_count() -> usize {
    3
}

/// Who is asking, where, and about what.
#[derive(Debug, Clone, Deserialize)]
pub struct RequirementPrompt {
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub persona: String,
    #[serde(default)]
    pub product: String,
    #[serde(default = "default_count")]
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedQuestion {
    pub question: String,
}

pub const MAX_QUESTIONS: usize = 50;

pub fn question_system_prompt(count: usize) -> String {
    format!(
        r#"Your goal is to generate questions from a user on a given product.

You are given a context, a persona and a product.
The context describes where the user is accessing the product.
The persona describes the user themselves.
The product is the item the user is interested in.

# instructions
- empathize with the user based on the given persona
- imagine a situation grounded in the given context where the user would access the product
- generate {count} question(s) this user would have on this product
- IMPORTANT: You must return ONLY {count} lines of JSONL format, each line being exactly {{"question":"[QUESTION]"}}
- DO NOT include any other text, explanations, or formatting
- Each line must be valid JSON

Example output format:
{{"question":"What are the key features of this product?"}}
{{"question":"How much does it cost?"}}
{{"question":"When can I start using it?"}}"#
    )
}

pub fn question_user_prompt(req: &RequirementPrompt) -> String {
    format!(
        "- context: {}\n- persona: {}\n- product: {}",
        req.context, req.persona, req.product
    )
}

/// Parses JSONL model output. Lines that are not `{"question": "<string>"}` are skipped.
pub fn parse_questions(content: &str) -> Vec<GeneratedQuestion> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str::<GeneratedQuestion>(line) {
            Ok(q) => Some(q),
            Err(e) => {
                tracing::debug!(line, error = %e, "skipping unparseable question line");
                None
            }
        })
        .collect()
}

pub async fn generate_questions(
    model: &dyn GenerativeModel,
    req: &RequirementPrompt,
) -> ServiceResult<Vec<GeneratedQuestion>> {
    if req.count == 0 || req.count > MAX_QUESTIONS {
        return Err(ServiceError::Validation(format!(
            "count must be between 1 and {}",
            MAX_QUESTIONS
        )));
    }

    let prompt =
        Prompt::user(question_user_prompt(req)).with_system(question_system_prompt(req.count));
    let content = model.generate(&prompt).await.map_err(|e| {
        tracing::error!(model = model.model_name(), error = %e, "question generation failed");
        ServiceError::Upstream(format!("failed to generate requirements: {}", e))
    })?;

    let questions = parse_questions(&content);
    if questions.is_empty() {
        return Err(ServiceError::Upstream(
            "failed to generate requirements: no valid questions were generated".into(),
        ));
    }
    Ok(questions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ModelError;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct Scripted {
        reply: &'static str,
        seen: Mutex<Option<Prompt>>,
    }

    impl Scripted {
        fn new(reply: &'static str) -> Self {
            Self {
                reply,
                seen: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl GenerativeModel for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn generate(&self, prompt: &Prompt) -> Result<String, ModelError> {
            *self.seen.lock().unwrap() = Some(prompt.clone());
            Ok(self.reply.to_string())
        }
    }

    fn request(count: usize) -> RequirementPrompt {
        RequirementPrompt {
            context: "on a train".into(),
            persona: "busy accountant".into(),
            product: "expense app".into(),
            count,
        }
    }

    #[test]
    fn count_defaults_to_three() {
        let req: RequirementPrompt =
            serde_json::from_str(r#"{"context":"c","persona":"p","product":"x"}"#).unwrap();
        assert_eq!(req.count, 3);
    }

    #[test]
    fn parser_skips_invalid_lines() {
        let content = "```\n{\"question\":\"How much?\"}\nnot json\n{\"answer\":\"x\"}\n\n{\"question\":\"When?\"}\n```";
        let parsed = parse_questions(content);
        assert_eq!(
            parsed,
            vec![
                GeneratedQuestion {
                    question: "How much?".into()
                },
                GeneratedQuestion {
                    question: "When?".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn generate_sends_system_and_user_prompts() {
        let model = Scripted::new("{\"question\":\"Does it work offline?\"}");
        let out = generate_questions(&model, &request(2)).await.unwrap();
        assert_eq!(out.len(), 1);

        let seen = model.seen.lock().unwrap().clone().unwrap();
        assert!(seen.system.unwrap().contains("generate 2 question(s)"));
        assert!(seen.user.contains("- persona: busy accountant"));
    }

    #[tokio::test]
    async fn no_valid_lines_is_an_upstream_error() {
        let model = Scripted::new("Sure! Here are some questions.");
        assert!(matches!(
            generate_questions(&model, &request(3)).await,
            Err(ServiceError::Upstream(_))
        ));
        assert!(matches!(
            generate_questions(&model, &request(0)).await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn analyze_file_rejects_unknown_formats() {
        let analyzer = BatchAnalyzer::new(
            Arc::new(Scripted::new("analysis")),
            1,
            Duration::from_secs(5),
        );
        assert!(matches!(
            analyze_file(&analyzer, "data.xyz", b"...").await,
            Err(ServiceError::UnsupportedFormat(_))
        ));
        assert_eq!(
            analyze_file(&analyzer, "notes.md", b"# Login").await.unwrap(),
            "analysis"
        );
    }
}
