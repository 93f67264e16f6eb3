//! SQLite-backed [`ProjectStore`].

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{dedup_ids, NewEvaluation, ProjectStore};
use crate::config::Config;
use crate::models::{
    from_millis, now_millis, Document, NewDocument, Vendor, VendorEvaluation, VendorStatus,
    VendorWithEvaluations,
};
use crate::{db, migrate};

const DOCUMENT_COLUMNS: &str = "id, project_id, name, url, blob_url, analysis, created_at";
const VENDOR_COLUMNS: &str = "id, project_id, name, description, status, created_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connects to the configured database and makes sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn document_from_row(row: &SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        project_id: row.get("project_id"),
        name: row.get("name"),
        url: row.get("url"),
        blob_url: row.get("blob_url"),
        analysis: row.get("analysis"),
        created_at: from_millis(row.get("created_at")),
    }
}

fn vendor_from_row(row: &SqliteRow) -> Result<Vendor> {
    let status: String = row.get("status");
    Ok(Vendor {
        id: row.get("id"),
        project_id: row.get("project_id"),
        name: row.get("name"),
        description: row.get("description"),
        status: status.parse::<VendorStatus>().map_err(|e| anyhow!(e))?,
        created_at: from_millis(row.get("created_at")),
    })
}

fn evaluation_from_row(row: &SqliteRow) -> VendorEvaluation {
    VendorEvaluation {
        id: row.get("id"),
        vendor_id: row.get("vendor_id"),
        category: row.get("category"),
        score: row.get("score"),
        comment: row.get("comment"),
        created_at: from_millis(row.get("created_at")),
    }
}

#[async_trait]
impl ProjectStore for SqliteStore {
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

        sqlx::query(
            "INSERT INTO requirement_documents (id, project_id, name, url, blob_url, analysis, created_at) VALUES (?, ?, ?, ?, ?, NULL, ?)",
        )
        .bind(&document.id)
        .bind(&document.project_id)
        .bind(&document.name)
        .bind(&document.url)
        .bind(&document.blob_url)
        .bind(document.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(document)
    }

    async fn list_documents(&self, project_id: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM requirement_documents WHERE project_id = ? ORDER BY created_at DESC, rowid DESC",
            DOCUMENT_COLUMNS
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(document_from_row).collect())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM requirement_documents WHERE id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(document_from_row))
    }

    async fn get_documents(&self, ids: &[String]) -> Result<Vec<Document>> {
        let ids = dedup_ids(ids);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM requirement_documents WHERE id IN ({})",
            DOCUMENT_COLUMNS, placeholders
        );
        let mut query = sqlx::query(&sql);
        for id in &ids {
            query = query.bind(*id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut found: Vec<Document> = rows.iter().map(document_from_row).collect();
        found.sort_by_key(|d| ids.iter().position(|id| *id == d.id));
        Ok(found)
    }

    async fn update_analysis(&self, id: &str, analysis: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE requirement_documents SET analysis = ? WHERE id = ?")
            .bind(analysis)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM requirement_documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
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

        sqlx::query(
            "INSERT INTO vendors (id, project_id, name, description, status, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&vendor.id)
        .bind(&vendor.project_id)
        .bind(&vendor.name)
        .bind(&vendor.description)
        .bind(vendor.status.as_str())
        .bind(vendor.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(vendor)
    }

    async fn get_vendor(&self, id: &str) -> Result<Option<Vendor>> {
        let row = sqlx::query(&format!("SELECT {} FROM vendors WHERE id = ?", VENDOR_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(vendor_from_row).transpose()
    }

    async fn update_vendor_status(&self, id: &str, status: VendorStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE vendors SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_vendors_with_evaluations(
        &self,
        project_id: &str,
    ) -> Result<Vec<VendorWithEvaluations>> {
        let vendor_rows = sqlx::query(&format!(
            "SELECT {} FROM vendors WHERE project_id = ? ORDER BY created_at ASC, rowid ASC",
            VENDOR_COLUMNS
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        let eval_rows = sqlx::query(
            "SELECT e.id, e.vendor_id, e.category, e.score, e.comment, e.created_at FROM vendor_evaluations e JOIN vendors v ON v.id = e.vendor_id WHERE v.project_id = ? ORDER BY e.created_at ASC, e.rowid ASC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        let mut vendors = vendor_rows
            .iter()
            .map(|row| {
                Ok(VendorWithEvaluations {
                    vendor: vendor_from_row(row)?,
                    evaluations: Vec::new(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        for row in &eval_rows {
            let evaluation = evaluation_from_row(row);
            if let Some(entry) = vendors
                .iter_mut()
                .find(|v| v.vendor.id == evaluation.vendor_id)
            {
                entry.evaluations.push(evaluation);
            }
        }

        Ok(vendors)
    }

    async fn add_evaluation(&self, evaluation: NewEvaluation) -> Result<VendorEvaluation> {
        let evaluation = VendorEvaluation {
            id: Uuid::new_v4().to_string(),
            vendor_id: evaluation.vendor_id,
            category: evaluation.category,
            score: evaluation.score,
            comment: evaluation.comment,
            created_at: now_millis(),
        };

        sqlx::query(
            "INSERT INTO vendor_evaluations (id, vendor_id, category, score, comment, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&evaluation.id)
        .bind(&evaluation.vendor_id)
        .bind(&evaluation.category)
        .bind(evaluation.score)
        .bind(&evaluation.comment)
        .bind(evaluation.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(evaluation)
    }
}
