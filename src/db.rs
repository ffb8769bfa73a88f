//! Database module - PostgreSQL connection and migrations

use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::models::FraudThreshold;

/// Create database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

/// Apply the schema and seed the default thresholds on first boot.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    tracing::info!("Database schema applied successfully");

    FraudThreshold::seed_defaults(pool).await?;
    Ok(())
}

/// Database schema SQL
const SCHEMA_SQL: &str = r#"
-- Enumerator directory (owned by the ingestion platform; minimal mirror)
CREATE TABLE IF NOT EXISTS enumerators (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    full_name VARCHAR(255) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Questionnaire forms; form_schema drives battery identification
CREATE TABLE IF NOT EXISTS questionnaire_forms (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    title VARCHAR(255) NOT NULL,
    form_schema JSONB,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Survey submissions, immutable once ingested
CREATE TABLE IF NOT EXISTS submissions (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    enumerator_id UUID NOT NULL REFERENCES enumerators(id),
    questionnaire_form_id UUID NOT NULL REFERENCES questionnaire_forms(id),
    respondent_id UUID,
    lga VARCHAR(255),
    submitted_at TIMESTAMPTZ NOT NULL,
    completion_time_seconds INT,
    gps_latitude DOUBLE PRECISION,
    gps_longitude DOUBLE PRECISION,
    gps_accuracy_m DOUBLE PRECISION,
    raw_data JSONB,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_submissions_enumerator_time
    ON submissions(enumerator_id, submitted_at DESC);
CREATE INDEX IF NOT EXISTS idx_submissions_submitted_at
    ON submissions(submitted_at);

-- Versioned heuristic configuration; rows close, never mutate
CREATE TABLE IF NOT EXISTS fraud_thresholds (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    rule_key VARCHAR(100) NOT NULL,
    display_name VARCHAR(255) NOT NULL,
    rule_category VARCHAR(50) NOT NULL,
    threshold_value DOUBLE PRECISION NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT true,
    effective_from TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    effective_until TIMESTAMPTZ,
    version INT NOT NULL DEFAULT 1,
    notes TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_thresholds_current
    ON fraud_thresholds(rule_key) WHERE effective_until IS NULL;

-- Scored detections; one row per submission per config version
CREATE TABLE IF NOT EXISTS fraud_detections (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    submission_id UUID NOT NULL REFERENCES submissions(id),
    enumerator_id UUID NOT NULL REFERENCES enumerators(id),
    computed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    config_snapshot_version INT NOT NULL,
    gps_score DOUBLE PRECISION NOT NULL DEFAULT 0,
    speed_score DOUBLE PRECISION NOT NULL DEFAULT 0,
    straightline_score DOUBLE PRECISION NOT NULL DEFAULT 0,
    duplicate_score DOUBLE PRECISION NOT NULL DEFAULT 0,
    timing_score DOUBLE PRECISION NOT NULL DEFAULT 0,
    total_score DOUBLE PRECISION NOT NULL DEFAULT 0,
    severity TEXT NOT NULL,
    gps_evidence JSONB,
    speed_evidence JSONB,
    straightline_evidence JSONB,
    duplicate_evidence JSONB,
    timing_evidence JSONB,
    resolution TEXT,
    resolution_notes TEXT,
    reviewed_by UUID,
    reviewed_at TIMESTAMPTZ,
    assessor_resolution TEXT,
    assessor_notes TEXT,
    assessor_reviewed_by UUID,
    assessor_reviewed_at TIMESTAMPTZ,
    UNIQUE (submission_id, config_snapshot_version)
);

CREATE INDEX IF NOT EXISTS idx_detections_severity ON fraud_detections(severity);
CREATE INDEX IF NOT EXISTS idx_detections_computed_at ON fraud_detections(computed_at DESC);
CREATE INDEX IF NOT EXISTS idx_detections_unresolved
    ON fraud_detections(computed_at) WHERE resolution IS NULL;
CREATE INDEX IF NOT EXISTS idx_detections_assessor_queue
    ON fraud_detections(computed_at) WHERE resolution IS NOT NULL AND assessor_resolution IS NULL;
"#;
