//! Compliance checklist models.
//!
//! A `ComplianceReport` is produced by the compliance step from an external
//! checklist evaluator. Its `overall_score` is always derived from the
//! item statuses, never stored, so it cannot go stale.

use serde::{Deserialize, Serialize};

use crate::models::task::Section;

/// Reporting-guideline checklist families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecklistType {
    Consort,
    Prisma,
    Strobe,
}

impl ChecklistType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consort => "consort",
            Self::Prisma => "prisma",
            Self::Strobe => "strobe",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "consort" => Some(Self::Consort),
            "prisma" => Some(Self::Prisma),
            "strobe" => Some(Self::Strobe),
            _ => None,
        }
    }
}

impl Default for ChecklistType {
    fn default() -> Self {
        Self::Consort
    }
}

/// Evaluation outcome for one checklist item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pass,
    Warn,
    Fail,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Warn => "warn",
            Self::Fail => "fail",
        }
    }
}

/// One evaluated checklist entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceItem {
    pub item_id: String,
    pub description: String,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Manuscript section this item is attributed to, when the evaluator
    /// can tell. Drives which sections the revision loop rewrites.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<Section>,
}

/// Full checklist evaluation for one manuscript version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    pub checklist_type: ChecklistType,
    pub items: Vec<ComplianceItem>,
}

impl ComplianceReport {
    pub fn new(checklist_type: ChecklistType, items: Vec<ComplianceItem>) -> Self {
        Self {
            checklist_type,
            items,
        }
    }

    /// Ratio of passed items to total items. Recomputed on every call.
    pub fn overall_score(&self) -> f64 {
        if self.items.is_empty() {
            return 0.0;
        }
        let passed = self
            .items
            .iter()
            .filter(|i| i.status == ItemStatus::Pass)
            .count();
        passed as f64 / self.items.len() as f64
    }

    /// Distinct sections attributed to failing items, in first-seen order.
    pub fn failed_sections(&self) -> Vec<Section> {
        let mut out: Vec<Section> = Vec::new();
        for item in &self.items {
            if item.status == ItemStatus::Fail {
                if let Some(section) = item.section {
                    if !out.contains(&section) {
                        out.push(section);
                    }
                }
            }
        }
        out
    }
}
