use sqlx::SqlitePool;
use tracing::{error, info, instrument, warn};

use super::{
    dto::{SegmentationInput, SegmentationOutput},
    repo,
};
use crate::{
    config::GenerationConfig, error::AppError, generation::GenerationClient, pipeline, tabular,
};

/// A validated result. Saving it is best effort, so a storage failure rides
/// along instead of failing the request.
#[derive(Debug)]
pub struct InsightOutcome {
    pub output: SegmentationOutput,
    pub analysis_id: Option<i64>,
    pub storage_fault: Option<sqlx::Error>,
}

#[instrument(skip_all, fields(user_id = user_id, clusters = input.number_of_clusters))]
pub async fn run_segmentation(
    db: &SqlitePool,
    generator: &dyn GenerationClient,
    settings: &GenerationConfig,
    user_id: i64,
    input: SegmentationInput,
) -> Result<InsightOutcome, AppError> {
    input.check().map_err(AppError::Validation)?;

    let output = pipeline::with_deadline(
        settings.timeout,
        pipeline::run(generator, &input, &settings.language),
    )
    .await?;

    if output.segments.len() as i64 != input.number_of_clusters {
        warn!(
            requested = input.number_of_clusters,
            returned = output.segments.len(),
            "generated segment count differs from the request"
        );
    }

    match repo::save(db, user_id, &input, &output).await {
        Ok(id) => {
            info!(analysis_id = id, "analysis saved");
            Ok(InsightOutcome {
                output,
                analysis_id: Some(id),
                storage_fault: None,
            })
        }
        Err(e) => {
            error!(error = %e, "failed to save analysis; returning the result anyway");
            Ok(InsightOutcome {
                output,
                analysis_id: None,
                storage_fault: Some(e),
            })
        }
    }
}

/// Builds the insight input from a raw transaction log upload.
pub fn input_from_upload(
    raw: &[u8],
    number_of_clusters: i64,
    data_treatment: super::dto::DataTreatment,
) -> Result<SegmentationInput, AppError> {
    let text = String::from_utf8_lossy(raw);
    let cluster_data = tabular::preprocess(&text)?;
    Ok(SegmentationInput {
        cluster_data,
        data_treatment,
        number_of_clusters,
    })
}
