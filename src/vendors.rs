//! Vendor flows: registration, status changes, evaluation, and scored listings.

use serde::Deserialize;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{Vendor, VendorEvaluation, VendorStatus};
use crate::scoring::{rank, score_vendor, DuplicatePolicy, VendorScore};
use crate::store::{NewEvaluation, ProjectStore};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateVendorRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationRequest {
    #[serde(default)]
    pub category: String,
    pub score: f64,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusRequest {
    pub status: VendorStatus,
}

pub async fn create(
    store: &dyn ProjectStore,
    project_id: &str,
    req: CreateVendorRequest,
) -> ServiceResult<Vendor> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ServiceError::Validation("vendor name is required".into()));
    }
    let description = req.description.unwrap_or_default();

    let vendor = store.create_vendor(project_id, name, &description).await?;
    tracing::info!(project_id, vendor_id = %vendor.id, name, "vendor created");
    Ok(vendor)
}

pub async fn add_evaluation(
    store: &dyn ProjectStore,
    project_id: &str,
    vendor_id: &str,
    req: EvaluationRequest,
) -> ServiceResult<VendorEvaluation> {
    let category = req.category.trim();
    if category.is_empty() {
        return Err(ServiceError::Validation("category is required".into()));
    }
    if !req.score.is_finite() {
        return Err(ServiceError::Validation("score must be a finite number".into()));
    }

    store
        .get_vendor(vendor_id)
        .await?
        .filter(|v| v.project_id == project_id)
        .ok_or_else(|| ServiceError::NotFound(format!("vendor not found: {}", vendor_id)))?;

    let comment = req
        .comment
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    let evaluation = store
        .add_evaluation(NewEvaluation {
            vendor_id: vendor_id.to_string(),
            category: category.to_string(),
            score: req.score,
            comment,
        })
        .await?;
    tracing::info!(vendor_id, category, score = req.score, "evaluation recorded");
    Ok(evaluation)
}

/// Moves a vendor of `project_id` to a new lifecycle status.
pub async fn set_status(
    store: &dyn ProjectStore,
    project_id: &str,
    vendor_id: &str,
    req: StatusRequest,
) -> ServiceResult<Vendor> {
    let not_found = || ServiceError::NotFound(format!("vendor not found: {}", vendor_id));

    let mut vendor = store
        .get_vendor(vendor_id)
        .await?
        .filter(|v| v.project_id == project_id)
        .ok_or_else(not_found)?;

    if !store.update_vendor_status(vendor_id, req.status).await? {
        return Err(not_found());
    }
    tracing::info!(
        vendor_id,
        from = vendor.status.as_str(),
        to = req.status.as_str(),
        "vendor status changed"
    );
    vendor.status = req.status;
    Ok(vendor)
}

/// Vendors of a project with freshly computed scores, in creation order.
pub async fn list_scores(
    store: &dyn ProjectStore,
    project_id: &str,
    policy: DuplicatePolicy,
) -> ServiceResult<Vec<VendorScore>> {
    let vendors = store.list_vendors_with_evaluations(project_id).await?;
    Ok(vendors
        .iter()
        .map(|v| score_vendor(&v.vendor, &v.evaluations, policy))
        .collect())
}

/// Same as [`list_scores`], highest total first.
pub async fn ranked_scores(
    store: &dyn ProjectStore,
    project_id: &str,
    policy: DuplicatePolicy,
) -> ServiceResult<Vec<VendorScore>> {
    Ok(rank(list_scores(store, project_id, policy).await?))
}
