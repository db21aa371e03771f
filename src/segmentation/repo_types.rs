use sqlx::FromRow;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use super::dto::{AnalysisDetails, AnalysisSummary, DataTreatment, Segment, SegmentationOutput};

const SNIPPET_CHARS: usize = 50;

#[derive(Debug, Clone, FromRow)]
pub struct AnalysisRow {
    pub id: i64,
    pub created_at: i64,
    pub textual_insights: String,
    pub original_csv_data: String,
    pub data_treatment_normalize: bool,
    pub data_treatment_exclude_nulls: bool,
    pub data_treatment_group_categories: bool,
    pub number_of_clusters: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct SummaryRow {
    pub id: i64,
    pub created_at: i64,
    pub number_of_clusters: i64,
    pub original_csv_data: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct SegmentRow {
    pub name: String,
    pub size: i64,
    pub avg_purchase_value: f64,
    pub purchase_frequency: f64,
    pub description: String,
}

/// Unix milliseconds to RFC 3339; out-of-range values fall back to the epoch.
pub fn format_timestamp(millis: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(millis as i128 * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
        .format(&Rfc3339)
        .unwrap_or_default()
}

pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// First line of the stored input, capped, always followed by `...`.
pub fn snippet(data: &str) -> String {
    let first = data.split('\n').next().unwrap_or_default();
    let mut out: String = first.trim_end_matches('\r').chars().take(SNIPPET_CHARS).collect();
    out.push_str("...");
    out
}

impl From<SummaryRow> for AnalysisSummary {
    fn from(row: SummaryRow) -> Self {
        Self {
            id: row.id,
            timestamp: format_timestamp(row.created_at),
            number_of_clusters: row.number_of_clusters,
            original_data_snippet: snippet(&row.original_csv_data),
        }
    }
}

impl From<SegmentRow> for Segment {
    fn from(row: SegmentRow) -> Self {
        Self {
            name: row.name,
            size: row.size,
            avg_purchase_value: row.avg_purchase_value,
            purchase_frequency: row.purchase_frequency,
            description: row.description,
        }
    }
}

impl AnalysisRow {
    pub fn into_details(self, segments: Vec<SegmentRow>) -> AnalysisDetails {
        AnalysisDetails {
            id: self.id,
            timestamp: format_timestamp(self.created_at),
            number_of_clusters: self.number_of_clusters,
            data_treatment: DataTreatment {
                normalize: self.data_treatment_normalize,
                exclude_nulls: self.data_treatment_exclude_nulls,
                group_categories: self.data_treatment_group_categories,
            },
            original_csv_data: self.original_csv_data,
            output: SegmentationOutput {
                textual_insights: self.textual_insights,
                segments: segments.into_iter().map(Segment::from).collect(),
            },
        }
    }
}
