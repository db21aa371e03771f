use axum::{
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State},
    http::header::CONTENT_TYPE,
    routing::{get, post},
    Json, Router,
};
use tracing::{debug, instrument, warn};

use super::{
    dto::{AnalysisDetails, AnalysisSummary, DataTreatment, InsightResponse, SegmentationInput},
    repo,
    services::{input_from_upload, run_segmentation},
};
use crate::{auth::CurrentUser, error::AppError, state::AppState};

pub fn read_router() -> Router<AppState> {
    Router::new()
        .route("/segmentation-analyses", get(list_analyses))
        .route("/segmentation-analyses/:id", get(get_analysis))
}

pub fn write_router() -> Router<AppState> {
    Router::new()
        .route("/segmentation-insights", post(create_insights))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
}

/// POST /segmentation-insights
/// multipart upload of a raw transaction log, or JSON with pre-aggregated data
#[instrument(skip_all, fields(user_id = user.id))]
pub async fn create_insights(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    req: Request,
) -> Result<Json<InsightResponse>, AppError> {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let input = if content_type.starts_with("multipart/form-data") {
        let mp = Multipart::from_request(req, &state)
            .await
            .map_err(|e| AppError::Unprocessable(e.body_text()))?;
        read_upload(mp).await?
    } else if content_type.starts_with("application/json") {
        let Json(input) = Json::<SegmentationInput>::from_request(req, &state)
            .await
            .map_err(|e| AppError::Unprocessable(e.body_text()))?;
        input
    } else {
        return Err(AppError::Unprocessable(
            "Expected a multipart/form-data or application/json body".into(),
        ));
    };

    let outcome = run_segmentation(
        &state.db,
        state.generator.as_ref(),
        &state.config.generation,
        user.id,
        input,
    )
    .await?;

    if outcome.storage_fault.is_some() {
        warn!("responding with an analysis that was not saved");
    }

    Ok(Json(InsightResponse {
        output: outcome.output,
        analysis_id: outcome.analysis_id,
    }))
}

async fn read_upload(mut mp: Multipart) -> Result<SegmentationInput, AppError> {
    let mut file: Option<Vec<u8>> = None;
    let mut clusters: Option<i64> = None;
    let mut treatment = DataTreatment::default();

    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| AppError::Unprocessable(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Unprocessable(e.body_text()))?;
                file = Some(data.to_vec());
            }
            "numberOfClusters" | "normalize" | "excludeNulls" | "groupCategories" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::Unprocessable(e.body_text()))?;
                match name.as_str() {
                    "numberOfClusters" => {
                        clusters = Some(text.trim().parse().map_err(|_| {
                            AppError::Validation("numberOfClusters must be an integer".into())
                        })?);
                    }
                    "normalize" => treatment.normalize = parse_flag(&name, &text)?,
                    "excludeNulls" => treatment.exclude_nulls = parse_flag(&name, &text)?,
                    _ => treatment.group_categories = parse_flag(&name, &text)?,
                }
            }
            other => debug!(field = other, "ignoring multipart field"),
        }
    }

    let file = file.ok_or_else(|| AppError::Validation("file is required".into()))?;
    let clusters =
        clusters.ok_or_else(|| AppError::Validation("numberOfClusters is required".into()))?;
    input_from_upload(&file, clusters, treatment)
}

fn parse_flag(name: &str, raw: &str) -> Result<bool, AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Ok(true),
        "false" | "0" | "off" | "no" | "" => Ok(false),
        _ => Err(AppError::Validation(format!("{name} must be a boolean"))),
    }
}

#[instrument(skip_all, fields(user_id = user.id))]
pub async fn list_analyses(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<AnalysisSummary>>, AppError> {
    Ok(Json(repo::list_metadata(&state.db, user.id).await?))
}

#[instrument(skip_all, fields(user_id = user.id, analysis_id = id))]
pub async fn get_analysis(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<AnalysisDetails>, AppError> {
    repo::get_by_id(&state.db, user.id, id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Analysis not found".into()))
}
