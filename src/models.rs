//! Core data models used throughout Engagement Hub.
//!
//! Persisted records (documents, vendors, evaluations) and the transient
//! values that flow through the extraction and analysis pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An uploaded requirement document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub project_id: String,
    /// Original file name, also used for extension-based extraction.
    pub name: String,
    /// Download locator handed to clients.
    pub url: String,
    /// Raw-storage locator (blob key) used to fetch and release the bytes.
    pub blob_url: String,
    pub analysis: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to create a [`Document`]; id and timestamp are assigned by the caller.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub project_id: String,
    pub name: String,
    pub url: String,
    pub blob_url: String,
}

/// Vendor lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VendorStatus {
    Evaluating,
    Shortlisted,
    Selected,
    Rejected,
}

impl VendorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VendorStatus::Evaluating => "EVALUATING",
            VendorStatus::Shortlisted => "SHORTLISTED",
            VendorStatus::Selected => "SELECTED",
            VendorStatus::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for VendorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VendorStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EVALUATING" => Ok(VendorStatus::Evaluating),
            "SHORTLISTED" => Ok(VendorStatus::Shortlisted),
            "SELECTED" => Ok(VendorStatus::Selected),
            "REJECTED" => Ok(VendorStatus::Rejected),
            other => Err(format!("unknown vendor status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Vendor {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub description: String,
    pub status: VendorStatus,
    pub created_at: DateTime<Utc>,
}

/// A single category-scored appraisal of a vendor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VendorEvaluation {
    pub id: String,
    pub vendor_id: String,
    /// Free text; matched case-insensitively against the scoring buckets.
    pub category: String,
    pub score: f64,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A vendor together with its evaluations, oldest first.
#[derive(Debug, Clone)]
pub struct VendorWithEvaluations {
    pub vendor: Vendor,
    pub evaluations: Vec<VendorEvaluation>,
}

/// Extracted text of a document, ready for analysis. Transient.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentText {
    pub id: String,
    /// Empty string means nothing could be extracted.
    pub text: String,
}

/// Outcome of analysing one document. Transient.
///
/// Exactly one of `analysis` (non-empty) or `error` carries the outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub document_id: String,
    pub analysis: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalysisResult {
    pub fn success(document_id: impl Into<String>, analysis: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            analysis: analysis.into(),
            error: None,
        }
    }

    pub fn failure(document_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            analysis: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Current time truncated to millisecond precision, matching what the store keeps.
pub fn now_millis() -> DateTime<Utc> {
    from_millis(Utc::now().timestamp_millis())
}

pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
