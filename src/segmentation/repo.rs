use sqlx::{Sqlite, SqlitePool, Transaction};

use super::{
    dto::{AnalysisDetails, AnalysisSummary, Segment, SegmentationInput, SegmentationOutput},
    repo_types::{now_millis, AnalysisRow, SegmentRow, SummaryRow},
};

/// Persist an analysis and all of its segments, stamped with the current time.
pub async fn save(
    db: &SqlitePool,
    user_id: i64,
    input: &SegmentationInput,
    output: &SegmentationOutput,
) -> sqlx::Result<i64> {
    save_at(db, user_id, input, output, now_millis()).await
}

/// Same as [`save`] with an explicit creation time. Either every row lands
/// or none does.
pub async fn save_at(
    db: &SqlitePool,
    user_id: i64,
    input: &SegmentationInput,
    output: &SegmentationOutput,
    created_at: i64,
) -> sqlx::Result<i64> {
    let mut tx = db.begin().await?;

    let analysis_id = sqlx::query(
        r#"
        INSERT INTO analyses (
            user_id, created_at, textual_insights, original_csv_data,
            data_treatment_normalize, data_treatment_exclude_nulls,
            data_treatment_group_categories, number_of_clusters
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(created_at)
    .bind(&output.textual_insights)
    .bind(&input.cluster_data)
    .bind(input.data_treatment.normalize)
    .bind(input.data_treatment.exclude_nulls)
    .bind(input.data_treatment.group_categories)
    .bind(input.number_of_clusters)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    for segment in &output.segments {
        insert_segment_tx(&mut tx, analysis_id, segment).await?;
    }

    tx.commit().await?;
    Ok(analysis_id)
}

async fn insert_segment_tx(
    tx: &mut Transaction<'_, Sqlite>,
    analysis_id: i64,
    segment: &Segment,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO segments (
            analysis_id, name, size, avg_purchase_value, purchase_frequency, description
        )
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(analysis_id)
    .bind(&segment.name)
    .bind(segment.size)
    .bind(segment.avg_purchase_value)
    .bind(segment.purchase_frequency)
    .bind(&segment.description)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Newest first.
pub async fn list_metadata(db: &SqlitePool, user_id: i64) -> sqlx::Result<Vec<AnalysisSummary>> {
    let rows = sqlx::query_as::<_, SummaryRow>(
        r#"
        SELECT id, created_at, number_of_clusters, original_csv_data
        FROM analyses
        WHERE user_id = ?
        ORDER BY created_at DESC, id DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;
    Ok(rows.into_iter().map(AnalysisSummary::from).collect())
}

/// `None` both for missing analyses and for analyses owned by someone else.
pub async fn get_by_id(
    db: &SqlitePool,
    user_id: i64,
    analysis_id: i64,
) -> sqlx::Result<Option<AnalysisDetails>> {
    let Some(analysis) = sqlx::query_as::<_, AnalysisRow>(
        r#"
        SELECT id, created_at, textual_insights, original_csv_data,
               data_treatment_normalize, data_treatment_exclude_nulls,
               data_treatment_group_categories, number_of_clusters
        FROM analyses
        WHERE id = ? AND user_id = ?
        "#,
    )
    .bind(analysis_id)
    .bind(user_id)
    .fetch_optional(db)
    .await?
    else {
        return Ok(None);
    };

    let segments = sqlx::query_as::<_, SegmentRow>(
        r#"
        SELECT name, size, avg_purchase_value, purchase_frequency, description
        FROM segments
        WHERE analysis_id = ?
        ORDER BY id
        "#,
    )
    .bind(analysis.id)
    .fetch_all(db)
    .await?;

    Ok(Some(analysis.into_details(segments)))
}
