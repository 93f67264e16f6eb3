//! Batch analysis of requirement documents.
//!
//! Each document's text is sent to the analysis model with a fixed
//! requirements-extraction prompt. Documents are analysed independently: one
//! failure (model error, empty reply, batch deadline) becomes an error record
//! for that document and never aborts the rest of the batch.
//!
//! Media placeholders produced by [`crate::extract`] are never sent to the
//! model; they get a fixed explanatory analysis instead.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

use crate::config::AnalysisConfig;
use crate::extract::{extract, is_media_placeholder};
use crate::llm::{GenerativeModel, ModelError, Prompt};
use crate::models::{AnalysisResult, DocumentText};

/// Error recorded for any document whose analysis did not complete.
pub const ANALYSIS_FAILED: &str = "document analysis failed";

/// Error recorded for documents whose extraction produced no text.
pub const NO_TEXT: &str = "no text could be extracted from the document";

/// Builds the fixed analysis returned for image, video, and audio files.
pub fn media_skip_message(placeholder: &str) -> String {
    format!(
        "Media file: text analysis was skipped.\nFile info: {}",
        placeholder
    )
}

/// The requirements-extraction prompt with `text` appended.
pub fn requirements_prompt(text: &str) -> String {
    format!(
        "Analyse the following document and organise its requirements by category.

Points of analysis:
1. Classify each requirement as functional or non-functional
2. Priority (high / medium / low)
3. Implementation complexity (high / medium / low)
4. Requirements that depend on each other
5. Risk factors

Output format:
# Functional requirements
## Priority: high
- [Requirement name]
  - Description: [detailed description of the requirement]
  - Complexity: [high/medium/low]
  - Depends on: [related requirement IDs]
  - Risks: [anticipated risks]

## Priority: medium
[same format]

## Priority: low
[same format]

# Non-functional requirements
[same format]

# Additional considerations
- [important notes affecting the whole project]
- [technical constraints or challenges]
- [other concerns]

Document to analyse:
{}",
        text
    )
}

/// Runs per-document analysis with bounded concurrency and an overall deadline.
#[derive(Clone)]
pub struct BatchAnalyzer {
    model: Arc<dyn GenerativeModel>,
    concurrency: usize,
    batch_timeout: Duration,
}

impl BatchAnalyzer {
    pub fn new(model: Arc<dyn GenerativeModel>, concurrency: usize, batch_timeout: Duration) -> Self {
        Self {
            model,
            concurrency: concurrency.max(1),
            batch_timeout,
        }
    }

    pub fn from_config(model: Arc<dyn GenerativeModel>, config: &AnalysisConfig) -> Self {
        Self::new(
            model,
            config.concurrency,
            Duration::from_secs(config.batch_timeout_secs),
        )
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Analyses one document's text.
    ///
    /// Media placeholders short-circuit without a model call. A reply that is
    /// empty after trimming is [`ModelError::EmptyResponse`].
    pub async fn analyze_document(&self, text: &str) -> Result<String, ModelError> {
        if is_media_placeholder(text) {
            return Ok(media_skip_message(text));
        }

        let prompt = Prompt::user(requirements_prompt(text));
        let analysis = self.model.generate(&prompt).await?;
        if analysis.trim().is_empty() {
            return Err(ModelError::EmptyResponse);
        }
        Ok(analysis)
    }

    /// Analyses every document, returning exactly one result per input.
    ///
    /// Results come back in completion order, not input order.
    pub async fn analyze_batch(&self, documents: Vec<DocumentText>) -> Vec<AnalysisResult> {
        let deadline = Instant::now() + self.batch_timeout;
        let total = documents.len();

        let results: Vec<AnalysisResult> = stream::iter(documents)
            .map(|doc| async move {
                match timeout_at(deadline, self.analyze_document(&doc.text)).await {
                    Ok(Ok(analysis)) => AnalysisResult::success(doc.id, analysis),
                    Ok(Err(e)) => {
                        tracing::warn!(document_id = %doc.id, error = %e, "document analysis failed");
                        AnalysisResult::failure(doc.id, ANALYSIS_FAILED)
                    }
                    Err(_) => {
                        tracing::warn!(
                            document_id = %doc.id,
                            timeout_secs = self.batch_timeout.as_secs(),
                            "document analysis hit the batch deadline"
                        );
                        AnalysisResult::failure(doc.id, ANALYSIS_FAILED)
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let failed = results.iter().filter(|r| !r.is_success()).count();
        tracing::info!(
            model = self.model.model_name(),
            total,
            failed,
            "analysis batch finished"
        );
        results
    }
}

/// Raw bytes of a stored document, fetched for analysis.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub document_id: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Extraction output split into what the model should see and what already failed.
#[derive(Debug, Default)]
pub struct PreparedBatch {
    pub documents: Vec<DocumentText>,
    pub failures: Vec<AnalysisResult>,
}

/// Runs the text extractor over fetched files.
///
/// Unsupported formats and files with no text (after trimming) become
/// failure records; everything else is ready for [`BatchAnalyzer::analyze_batch`].
pub fn prepare_batch(files: Vec<SourceFile>) -> PreparedBatch {
    let mut batch = PreparedBatch::default();
    for file in files {
        match extract(&file.bytes, &file.file_name) {
            Ok(extraction) if extraction.text.trim().is_empty() => {
                batch
                    .failures
                    .push(AnalysisResult::failure(file.document_id, NO_TEXT));
            }
            Ok(extraction) => batch.documents.push(DocumentText {
                id: file.document_id,
                text: extraction.text,
            }),
            Err(e) => {
                tracing::warn!(document_id = %file.document_id, error = %e, "text extraction failed");
                batch
                    .failures
                    .push(AnalysisResult::failure(file.document_id, e.to_string()));
            }
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replies with the document text found after the prompt's final header.
    struct EchoModel;

    #[async_trait]
    impl GenerativeModel for EchoModel {
        fn model_name(&self) -> &str {
            "echo"
        }
        async fn generate(&self, prompt: &Prompt) -> Result<String, ModelError> {
            let body = prompt
                .user
                .rsplit_once("Document to analyse:\n")
                .map(|(_, text)| text)
                .unwrap_or_default();
            Ok(format!("analysed: {}", body))
        }
    }

    /// Fails for any text containing "boom", echoes otherwise.
    struct SelectiveModel;

    #[async_trait]
    impl GenerativeModel for SelectiveModel {
        fn model_name(&self) -> &str {
            "selective"
        }
        async fn generate(&self, prompt: &Prompt) -> Result<String, ModelError> {
            if prompt.user.contains("boom") {
                Err(ModelError::Communication("connection reset".into()))
            } else {
                Ok("fine".into())
            }
        }
    }

    #[derive(Default)]
    struct CountingModel {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl GenerativeModel for CountingModel {
        fn model_name(&self) -> &str {
            "counting"
        }
        async fn generate(&self, _prompt: &Prompt) -> Result<String, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok("counted".into())
        }
    }

    struct FixedModel(&'static str);

    #[async_trait]
    impl GenerativeModel for FixedModel {
        fn model_name(&self) -> &str {
            "fixed"
        }
        async fn generate(&self, _prompt: &Prompt) -> Result<String, ModelError> {
            Ok(self.0.to_string())
        }
    }

    struct SlowModel;

    #[async_trait]
    impl GenerativeModel for SlowModel {
        fn model_name(&self) -> &str {
            "slow"
        }
        async fn generate(&self, prompt: &Prompt) -> Result<String, ModelError> {
            if prompt.user.contains("quick") {
                return Ok("quick reply".into());
            }
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("too late".into())
        }
    }

    fn analyzer(model: Arc<dyn GenerativeModel>) -> BatchAnalyzer {
        BatchAnalyzer::new(model, 4, Duration::from_secs(30))
    }

    fn doc(id: &str, text: &str) -> DocumentText {
        DocumentText {
            id: id.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn prompt_appends_document_text() {
        let prompt = requirements_prompt("Need login and payment");
        assert!(prompt.contains("functional or non-functional"));
        assert!(prompt.contains("# Additional considerations"));
        assert!(prompt.ends_with("Document to analyse:\nNeed login and payment"));
    }

    #[tokio::test]
    async fn every_input_id_appears_exactly_once() {
        let docs: Vec<_> = (0..10)
            .map(|i| doc(&format!("d{}", i), if i % 3 == 0 { "boom" } else { "ok" }))
            .collect();
        let ids: HashSet<_> = docs.iter().map(|d| d.id.clone()).collect();

        let results = analyzer(Arc::new(SelectiveModel)).analyze_batch(docs).await;

        assert_eq!(results.len(), 10);
        let out: HashSet<_> = results.iter().map(|r| r.document_id.clone()).collect();
        assert_eq!(out, ids);
    }

    #[tokio::test]
    async fn failures_are_isolated_per_document() {
        let results = analyzer(Arc::new(SelectiveModel))
            .analyze_batch(vec![doc("a", "ok"), doc("b", "boom"), doc("c", "ok")])
            .await;

        for r in &results {
            if r.document_id == "b" {
                assert_eq!(r.analysis, "");
                assert_eq!(r.error.as_deref(), Some(ANALYSIS_FAILED));
            } else {
                assert_eq!(r.analysis, "fine");
                assert!(r.error.is_none());
            }
        }
    }

    #[tokio::test]
    async fn media_placeholders_skip_the_model() {
        let model = Arc::new(CountingModel::default());
        let results = analyzer(model.clone())
            .analyze_batch(vec![
                doc("img", "[IMAGE FILE] foo.png"),
                doc("vid", "[VIDEO FILE] bar.mp4"),
                doc("aud", "[AUDIO FILE] baz.mp3"),
            ])
            .await;

        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
        for r in results {
            assert!(r.error.is_none());
            assert!(r.analysis.starts_with("Media file: text analysis was skipped."));
        }
    }

    #[tokio::test]
    async fn pdf_placeholder_is_still_sent_to_the_model() {
        let model = Arc::new(CountingModel::default());
        analyzer(model.clone())
            .analyze_batch(vec![doc("p", "[PDF FILE] spec.pdf")])
            .await;
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn echo_model_sees_the_document_text() {
        let results = analyzer(Arc::new(EchoModel))
            .analyze_batch(vec![doc("n", "Need login and payment")])
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].analysis, "analysed: Need login and payment");
    }

    #[tokio::test]
    async fn blank_model_output_is_a_failure() {
        let results = analyzer(Arc::new(FixedModel("  \n ")))
            .analyze_batch(vec![doc("x", "text")])
            .await;
        assert_eq!(results[0].error.as_deref(), Some(ANALYSIS_FAILED));
    }

    #[tokio::test]
    async fn deterministic_model_gives_same_results_on_rerun() {
        let a = analyzer(Arc::new(FixedModel("same")));
        let first = a.analyze_batch(vec![doc("x", "t")]).await;
        let second = a.analyze_batch(vec![doc("x", "t")]).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let model = Arc::new(CountingModel::default());
        let a = BatchAnalyzer::new(model.clone(), 2, Duration::from_secs(30));
        let docs = (0..6).map(|i| doc(&i.to_string(), "text")).collect();

        let results = a.analyze_batch(docs).await;

        assert_eq!(results.len(), 6);
        assert_eq!(model.calls.load(Ordering::SeqCst), 6);
        assert!(model.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn deadline_marks_pending_documents_failed() {
        let a = BatchAnalyzer::new(Arc::new(SlowModel), 4, Duration::from_millis(100));
        let results = a
            .analyze_batch(vec![doc("fast", "quick"), doc("slow", "lengthy")])
            .await;

        assert_eq!(results.len(), 2);
        for r in results {
            match r.document_id.as_str() {
                "fast" => assert_eq!(r.analysis, "quick reply"),
                _ => assert_eq!(r.error.as_deref(), Some(ANALYSIS_FAILED)),
            }
        }
    }

    #[test]
    fn prepare_batch_splits_out_failed_extractions() {
        let files = vec![
            SourceFile {
                document_id: "n".into(),
                file_name: "notes.txt".into(),
                bytes: b"Need login and payment".to_vec(),
            },
            SourceFile {
                document_id: "x".into(),
                file_name: "data.xyz".into(),
                bytes: b"???".to_vec(),
            },
            SourceFile {
                document_id: "e".into(),
                file_name: "empty.md".into(),
                bytes: b"  \n".to_vec(),
            },
            SourceFile {
                document_id: "i".into(),
                file_name: "foo.png".into(),
                bytes: vec![0x89, 0x50],
            },
        ];

        let batch = prepare_batch(files);

        assert_eq!(
            batch.documents,
            vec![
                doc("n", "Need login and payment"),
                doc("i", "[IMAGE FILE] foo.png"),
            ]
        );
        assert_eq!(batch.failures.len(), 2);
        assert_eq!(batch.failures[0].document_id, "x");
        assert!(batch.failures[0].error.as_deref().unwrap().contains("xyz"));
        assert_eq!(batch.failures[1].error.as_deref(), Some(NO_TEXT));
    }
}
