//! In-memory [`ProjectStore`] implementation for tests.
//!
//! Rows live in insertion-ordered `Vec`s behind `std::sync::RwLock`, which
//! gives the same tie-breaking as SQLite's `rowid`.

use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use uuid::Uuid;

use super::{dedup_ids, NewEvaluation, ProjectStore};
use crate::models::{
    now_millis, Document, NewDocument, Vendor, VendorEvaluation, VendorStatus,
    VendorWithEvaluations,
};

pub struct InMemoryStore {
    documents: RwLock<Vec<Document>>,
    vendors: RwLock<Vec<Vendor>>,
    evaluations: RwLock<Vec<VendorEvaluation>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(Vec::new()),
            vendors: RwLock::new(Vec::new()),
            evaluations: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl ProjectStore for InMemoryStore {
    async fn insert_document(&self, doc: NewDocument) -> Result<Document> {
        let document = Document {
            id: Uuid::new_v4().to_string(),
            project_id: doc.project_id,
            name: doc.name,
            url: doc.url,
            blob_url: doc.blob_url,
            analysis: None,
            created_at: now_millis(),
        };
        self.documents
            .write()
            .map_err(poisoned)?
            .push(document.clone());
        Ok(document)
    }

    async fn list_documents(&self, project_id: &str) -> Result<Vec<Document>> {
        let docs = self.documents.read().map_err(poisoned)?;
        // Reverse first so that equal timestamps come out newest insert first.
        let mut out: Vec<Document> = docs
            .iter()
            .rev()
            .filter(|d| d.project_id == project_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let docs = self.documents.read().map_err(poisoned)?;
        Ok(docs.iter().find(|d| d.id == id).cloned())
    }

    async fn get_documents(&self, ids: &[String]) -> Result<Vec<Document>> {
        let docs = self.documents.read().map_err(poisoned)?;
        Ok(dedup_ids(ids)
            .into_iter()
            .filter_map(|id| docs.iter().find(|d| d.id == id).cloned())
            .collect())
    }

    async fn update_analysis(&self, id: &str, analysis: &str) -> Result<bool> {
        let mut docs = self.documents.write().map_err(poisoned)?;
        match docs.iter_mut().find(|d| d.id == id) {
            Some(doc) => {
                doc.analysis = Some(analysis.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut docs = self.documents.write().map_err(poisoned)?;
        let before = docs.len();
        docs.retain(|d| d.id != id);
        Ok(docs.len() != before)
    }

    async fn create_vendor(
        &self,
        project_id: &str,
        name: &str,
        description: &str,
    ) -> Result<Vendor> {
        let vendor = Vendor {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            status: VendorStatus::Evaluating,
            created_at: now_millis(),
        };
        self.vendors.write().map_err(poisoned)?.push(vendor.clone());
        Ok(vendor)
    }

    async fn get_vendor(&self, id: &str) -> Result<Option<Vendor>> {
        let vendors = self.vendors.read().map_err(poisoned)?;
        Ok(vendors.iter().find(|v| v.id == id).cloned())
    }

    async fn update_vendor_status(&self, id: &str, status: VendorStatus) -> Result<bool> {
        let mut vendors = self.vendors.write().map_err(poisoned)?;
        match vendors.iter_mut().find(|v| v.id == id) {
            Some(vendor) => {
                vendor.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_vendors_with_evaluations(
        &self,
        project_id: &str,
    ) -> Result<Vec<VendorWithEvaluations>> {
        let vendors = self.vendors.read().map_err(poisoned)?;
        let evaluations = self.evaluations.read().map_err(poisoned)?;

        let mut out: Vec<VendorWithEvaluations> = vendors
            .iter()
            .filter(|v| v.project_id == project_id)
            .map(|v| VendorWithEvaluations {
                vendor: v.clone(),
                evaluations: evaluations
                    .iter()
                    .filter(|e| e.vendor_id == v.id)
                    .cloned()
                    .collect(),
            })
            .collect();
        out.sort_by(|a, b| a.vendor.created_at.cmp(&b.vendor.created_at));
        for entry in &mut out {
            entry.evaluations.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        }
        Ok(out)
    }

    async fn add_evaluation(&self, evaluation: NewEvaluation) -> Result<VendorEvaluation> {
        if self.get_vendor(&evaluation.vendor_id).await?.is_none() {
            return Err(anyhow!("vendor not found: {}", evaluation.vendor_id));
        }
        let evaluation = VendorEvaluation {
            id: Uuid::new_v4().to_string(),
            vendor_id: evaluation.vendor_id,
            category: evaluation.category,
            score: evaluation.score,
            comment: evaluation.comment,
            created_at: now_millis(),
        };
        self.evaluations
            .write()
            .map_err(poisoned)?
            .push(evaluation.clone());
        Ok(evaluation)
    }
}
