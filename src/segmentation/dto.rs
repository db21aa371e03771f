use serde::{Deserialize, Serialize};

use crate::pipeline::{ensure_non_negative, Validate};

pub const MAX_CLUSTERS: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTreatment {
    pub normalize: bool,
    pub exclude_nulls: bool,
    pub group_categories: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentationInput {
    pub cluster_data: String,
    pub data_treatment: DataTreatment,
    pub number_of_clusters: i64,
}

impl SegmentationInput {
    /// Request-side checks; these run before any generation call.
    pub fn check(&self) -> Result<(), String> {
        if self.cluster_data.trim().is_empty() {
            return Err("clusterData must not be empty".into());
        }
        if !(1..=MAX_CLUSTERS).contains(&self.number_of_clusters) {
            return Err(format!(
                "numberOfClusters must be between 1 and {MAX_CLUSTERS}"
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub name: String,
    pub size: i64,
    pub avg_purchase_value: f64,
    pub purchase_frequency: f64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentationOutput {
    pub textual_insights: String,
    pub segments: Vec<Segment>,
}

impl Validate for Segment {
    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("segment name must not be empty".into());
        }
        if self.size < 0 {
            return Err(format!("segment {} has a negative size", self.name));
        }
        ensure_non_negative("avg_purchase_value", self.avg_purchase_value)?;
        ensure_non_negative("purchase_frequency", self.purchase_frequency)
    }
}

impl Validate for SegmentationOutput {
    fn validate(&self) -> Result<(), String> {
        if self.segments.is_empty() {
            return Err("at least one segment is required".into());
        }
        self.segments.iter().try_for_each(|s| s.validate())
    }
}

/// One entry of the history listing.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
    pub id: i64,
    pub timestamp: String,
    pub number_of_clusters: i64,
    pub original_data_snippet: String,
}

/// A stored analysis with its segments.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisDetails {
    pub id: i64,
    pub timestamp: String,
    pub number_of_clusters: i64,
    pub data_treatment: DataTreatment,
    pub original_csv_data: String,
    #[serde(flatten)]
    pub output: SegmentationOutput,
}

/// Body of a successful insight request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightResponse {
    #[serde(flatten)]
    pub output: SegmentationOutput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_id: Option<i64>,
}
