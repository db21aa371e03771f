use axum::{extract::State, routing::post, Json, Router};
use tracing::instrument;

use super::dto::{StrategyInput, StrategyOutput};
use crate::{error::AppError, pipeline, state::AppState};

pub fn router() -> Router<AppState> {
    Router::new().route("/marketing-strategies", post(create_strategies))
}

/// Stateless; nothing is persisted.
#[instrument(skip_all)]
pub async fn create_strategies(
    State(state): State<AppState>,
    Json(input): Json<StrategyInput>,
) -> Result<Json<StrategyOutput>, AppError> {
    input.check().map_err(AppError::Validation)?;

    let settings = &state.config.generation;
    let output = pipeline::with_deadline(
        settings.timeout,
        pipeline::run(state.generator.as_ref(), &input, &settings.language),
    )
    .await?;

    Ok(Json(output))
}
