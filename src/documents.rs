//! Requirement document flows: upload, list, delete, and batch analysis.
//!
//! These functions hold the endpoint logic; [`crate::server`] only decodes
//! requests and renders responses, and the CLI calls them directly.

use anyhow::Context;
use serde::Deserialize;

use crate::analysis::{prepare_batch, BatchAnalyzer, SourceFile};
use crate::error::{ServiceError, ServiceResult};
use crate::models::{AnalysisResult, Document, NewDocument};
use crate::storage::{BlobStore, StorageError};
use crate::store::ProjectStore;

/// Stores the raw file, then records the document.
///
/// If the row cannot be written the blob is released again.
pub async fn upload(
    store: &dyn ProjectStore,
    blobs: &dyn BlobStore,
    project_id: &str,
    file_name: &str,
    bytes: &[u8],
) -> ServiceResult<Document> {
    if file_name.trim().is_empty() {
        return Err(ServiceError::Validation("file name is required".into()));
    }

    let blob = blobs.put(file_name, bytes).await.map_err(|e| {
        tracing::error!(file_name, error = %e, "failed to store uploaded file");
        ServiceError::Upstream(format!("failed to store file: {}", e))
    })?;

    let inserted = store
        .insert_document(NewDocument {
            project_id: project_id.to_string(),
            name: file_name.to_string(),
            url: blob.url.clone(),
            blob_url: blob.key.clone(),
        })
        .await;

    match inserted {
        Ok(document) => {
            tracing::info!(
                project_id,
                document_id = %document.id,
                file_name,
                size = bytes.len(),
                "document uploaded"
            );
            Ok(document)
        }
        Err(e) => {
            if let Err(cleanup) = blobs.delete(&blob.key).await {
                tracing::warn!(key = %blob.key, error = %cleanup, "failed to release orphaned blob");
            }
            Err(ServiceError::Internal(e.context("failed to record document")))
        }
    }
}

pub async fn list(store: &dyn ProjectStore, project_id: &str) -> ServiceResult<Vec<Document>> {
    Ok(store.list_documents(project_id).await?)
}

/// Deletes a document: blob first, then the row.
///
/// A blob that is already gone counts as released. Any other blob failure
/// keeps the row so the delete can be retried.
pub async fn delete(
    store: &dyn ProjectStore,
    blobs: &dyn BlobStore,
    project_id: &str,
    document_id: Option<&str>,
) -> ServiceResult<()> {
    let document_id = document_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ServiceError::Validation("documentId is required".into()))?;

    let document = store
        .get_document(document_id)
        .await?
        .filter(|d| d.project_id == project_id)
        .ok_or_else(|| ServiceError::NotFound(format!("document not found: {}", document_id)))?;

    match blobs.delete(&document.blob_url).await {
        Ok(()) => {}
        Err(StorageError::NotFound(key)) => {
            tracing::warn!(document_id, key = %key, "blob already missing; removing record");
        }
        Err(e) => {
            tracing::error!(document_id, error = %e, "blob deletion failed; record kept");
            return Err(ServiceError::Upstream(format!(
                "failed to delete file from blob storage: {}",
                e
            )));
        }
    }

    let removed = store
        .delete_document(document_id)
        .await
        .context("blob deleted but failed to delete document record from the database")?;
    if !removed {
        return Err(ServiceError::NotFound(format!(
            "document not found: {}",
            document_id
        )));
    }

    tracing::info!(project_id, document_id, "document deleted");
    Ok(())
}

/// Body of an analyze request: a single id, a list, or both.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub document_ids: Option<Vec<String>>,
}

impl AnalyzeRequest {
    /// All requested ids, blanks dropped.
    pub fn ids(&self) -> Vec<String> {
        self.document_ids
            .iter()
            .flatten()
            .chain(self.document_id.iter())
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect()
    }
}

/// Analyses stored documents and persists each successful analysis.
///
/// `project_id` restricts the lookup to one project; `None` accepts any.
/// The returned list has one entry per found document, including entries
/// whose fetch, extraction, or analysis failed.
pub async fn analyze(
    store: &dyn ProjectStore,
    blobs: &dyn BlobStore,
    analyzer: &BatchAnalyzer,
    project_id: Option<&str>,
    ids: &[String],
) -> ServiceResult<Vec<AnalysisResult>> {
    if ids.is_empty() {
        return Err(ServiceError::Validation(
            "documentId or documentIds is required".into(),
        ));
    }

    let documents: Vec<Document> = store
        .get_documents(ids)
        .await?
        .into_iter()
        .filter(|d| project_id.map_or(true, |p| d.project_id == p))
        .collect();
    if documents.is_empty() {
        return Err(ServiceError::NotFound("no documents found".into()));
    }

    let mut failures = Vec::new();
    let mut files = Vec::with_capacity(documents.len());
    for document in documents {
        match blobs.get(&document.blob_url).await {
            Ok(bytes) => files.push(SourceFile {
                document_id: document.id,
                file_name: document.name,
                bytes,
            }),
            Err(e) => {
                tracing::warn!(document_id = %document.id, error = %e, "failed to fetch document content");
                failures.push(AnalysisResult::failure(
                    document.id,
                    "failed to fetch document content",
                ));
            }
        }
    }

    let batch = prepare_batch(files);
    failures.extend(batch.failures);
    if batch.documents.is_empty() {
        return Err(ServiceError::Validation(
            "no documents with extractable text".into(),
        ));
    }

    let mut results = analyzer.analyze_batch(batch.documents).await;

    for result in results.iter_mut().filter(|r| r.is_success()) {
        match store
            .update_analysis(&result.document_id, &result.analysis)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(document_id = %result.document_id, "document removed before analysis was saved");
            }
            Err(e) => {
                tracing::warn!(document_id = %result.document_id, error = %format!("{:#}", e), "failed to save analysis");
                *result = AnalysisResult::failure(result.document_id.clone(), "failed to save analysis");
            }
        }
    }

    results.extend(failures);
    Ok(results)
}
