//! Persistence gateway for Engagement Hub.
//!
//! The [`ProjectStore`] trait covers every read and write the services need:
//! documents, vendors, and vendor evaluations. Two backends implement it:
//!
//! - [`SqliteStore`]: the production backend over a `sqlx` pool.
//! - [`InMemoryStore`]: insertion-ordered `Vec`s behind `RwLock`, for tests.
//!
//! Implementations must be `Send + Sync` so they can be shared as
//! `Arc<dyn ProjectStore>` across request tasks.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    Document, NewDocument, Vendor, VendorEvaluation, VendorStatus, VendorWithEvaluations,
};

/// Fields for a new vendor evaluation.
#[derive(Debug, Clone)]
pub struct NewEvaluation {
    pub vendor_id: String,
    pub category: String,
    pub score: f64,
    pub comment: Option<String>,
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Inserts a document, assigning its id and creation time.
    async fn insert_document(&self, doc: NewDocument) -> Result<Document>;

    /// Documents of a project, newest first.
    async fn list_documents(&self, project_id: &str) -> Result<Vec<Document>>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// Fetches several documents. Unknown ids are skipped; the rest keep
    /// the order of `ids` with duplicates removed.
    async fn get_documents(&self, ids: &[String]) -> Result<Vec<Document>>;

    /// Overwrites the stored analysis. Returns `false` if the document is gone.
    async fn update_analysis(&self, id: &str, analysis: &str) -> Result<bool>;

    /// Removes the document row. Returns `false` if it did not exist.
    async fn delete_document(&self, id: &str) -> Result<bool>;

    /// Creates a vendor in the `EVALUATING` state.
    async fn create_vendor(&self, project_id: &str, name: &str, description: &str)
        -> Result<Vendor>;

    async fn get_vendor(&self, id: &str) -> Result<Option<Vendor>>;

    /// Moves a vendor to `status`. Returns `false` if the vendor is gone.
    async fn update_vendor_status(&self, id: &str, status: VendorStatus) -> Result<bool>;

    /// Vendors of a project in creation order, each with its evaluations oldest first.
    async fn list_vendors_with_evaluations(
        &self,
        project_id: &str,
    ) -> Result<Vec<VendorWithEvaluations>>;

    async fn add_evaluation(&self, evaluation: NewEvaluation) -> Result<VendorEvaluation>;
}

/// Drops repeated ids, keeping first occurrences in order.
fn dedup_ids(ids: &[String]) -> Vec<&str> {
    let mut seen = std::collections::HashSet::new();
    ids.iter()
        .map(String::as_str)
        .filter(|id| seen.insert(*id))
        .collect()
}
