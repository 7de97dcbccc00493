//! Database schema creation
//!
//! Idempotent CREATE TABLE / INDEX / VIEW statements for the lead pipeline.
//! All entity tables carry `tenant_id`; identifiers and timestamps are TEXT
//! (UUID strings, RFC 3339). JSON-shaped attributes live in TEXT columns.

use crate::Result;
use sqlx::SqlitePool;

pub async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_lead_sources_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lead_sources (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            slug TEXT NOT NULL,
            display_name TEXT NOT NULL,
            csv_config TEXT NOT NULL DEFAULT '{}',
            field_mapping TEXT NOT NULL DEFAULT '{}',
            validation_rules TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            UNIQUE(tenant_id, slug)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_ingestion_batches_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_batches (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            lead_source_id TEXT NOT NULL REFERENCES lead_sources(id),
            file_ref TEXT NOT NULL,
            file_name TEXT NOT NULL,
            file_hash TEXT NOT NULL,
            received_at TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            total_rows INTEGER NOT NULL DEFAULT 0,
            parsed_rows INTEGER NOT NULL DEFAULT 0,
            valid_rows INTEGER NOT NULL DEFAULT 0,
            duplicate_rows INTEGER NOT NULL DEFAULT 0,
            error_rows INTEGER NOT NULL DEFAULT 0,
            log TEXT NOT NULL DEFAULT '[]',
            errors TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(tenant_id, file_hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_batches_status ON ingestion_batches(status)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_raw_rows_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS raw_rows (
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL REFERENCES ingestion_batches(id),
            row_number INTEGER NOT NULL,
            raw_data TEXT NOT NULL DEFAULT '{}',
            is_valid INTEGER NOT NULL DEFAULT 1,
            validation_errors TEXT NOT NULL DEFAULT '[]',
            is_duplicate INTEGER NOT NULL DEFAULT 0,
            duplicate_of TEXT,
            canonical_lead_id TEXT,
            created_at TEXT NOT NULL,
            UNIQUE(batch_id, row_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_raw_rows_batch ON raw_rows(batch_id)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn create_canonical_leads_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS canonical_leads (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            lead_source_id TEXT NOT NULL REFERENCES lead_sources(id),
            first_name TEXT,
            last_name TEXT,
            email TEXT,
            email_normalized TEXT,
            phone TEXT,
            phone_normalized TEXT,
            address TEXT,
            address_normalized TEXT,
            city TEXT,
            state TEXT,
            zip TEXT,
            lead_type TEXT,
            source_record_id TEXT,
            source_created_at TEXT,
            match_status TEXT NOT NULL DEFAULT 'pending',
            match_confidence REAL,
            embedding BLOB,
            embedding_text TEXT,
            embedded_at TEXT,
            raw_data TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_canonical_leads_dedup
            ON canonical_leads(tenant_id, lead_source_id, email_normalized)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_canonical_leads_match_status ON canonical_leads(match_status)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_crm_leads_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS crm_leads (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            crm_connection_id TEXT NOT NULL REFERENCES crm_connections(id),
            external_id TEXT NOT NULL,
            first_name TEXT,
            last_name TEXT,
            email TEXT,
            email_normalized TEXT,
            phone TEXT,
            phone_normalized TEXT,
            address TEXT,
            address_normalized TEXT,
            assigned_user_id TEXT,
            assigned_user_email TEXT,
            assigned_user_name TEXT,
            stage TEXT,
            source TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            sync_hash TEXT NOT NULL,
            embedding BLOB,
            embedding_text TEXT,
            embedded_at TEXT,
            crm_updated_at TEXT,
            last_synced_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(crm_connection_id, external_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_crm_leads_email ON crm_leads(tenant_id, email_normalized)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_crm_leads_phone ON crm_leads(tenant_id, phone_normalized)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_lead_matches_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lead_matches (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            canonical_lead_id TEXT NOT NULL REFERENCES canonical_leads(id),
            crm_lead_id TEXT NOT NULL REFERENCES crm_leads(id),
            match_type TEXT NOT NULL,
            confidence REAL NOT NULL,
            match_details TEXT NOT NULL DEFAULT '{}',
            matched_by TEXT NOT NULL,
            matched_by_user_id TEXT,
            attributed_team_id TEXT,
            attributed_agent_id TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(canonical_lead_id, crm_lead_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_matches_canonical ON lead_matches(canonical_lead_id, status)",
    )
    .execute(pool)
    .await?;

    // At most one active match per canonical lead, whatever the CRM side.
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_matches_one_active
            ON lead_matches(canonical_lead_id) WHERE status = 'active'
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_match_candidates_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS match_candidates (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            canonical_lead_id TEXT NOT NULL REFERENCES canonical_leads(id),
            crm_lead_id TEXT NOT NULL REFERENCES crm_leads(id),
            match_type TEXT NOT NULL,
            confidence_score REAL NOT NULL,
            match_reasons TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL DEFAULT 'pending',
            review_notes TEXT,
            reviewed_by TEXT,
            reviewed_at TEXT,
            lead_match_id TEXT,
            expires_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(canonical_lead_id, crm_lead_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_candidates_pending ON match_candidates(status, expires_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_lineage_entries_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lineage_entries (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            source_table TEXT NOT NULL,
            source_id TEXT NOT NULL,
            target_table TEXT NOT NULL,
            target_id TEXT NOT NULL,
            operation TEXT NOT NULL,
            transformation_type TEXT NOT NULL,
            performed_by TEXT NOT NULL,
            details TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_lineage_source ON lineage_entries(source_table, source_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_embedding_tasks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_tasks (
            id TEXT PRIMARY KEY,
            table_name TEXT NOT NULL,
            record_id TEXT NOT NULL,
            text_to_embed TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            claimed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(table_name, record_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_embedding_tasks_queue ON embedding_tasks(status, created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_crm_connections_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS crm_connections (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            name TEXT NOT NULL,
            base_url TEXT NOT NULL,
            api_key TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            last_sync_at TEXT,
            last_sync_status TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_sync_logs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_logs (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            crm_connection_id TEXT NOT NULL REFERENCES crm_connections(id),
            sync_type TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at TEXT NOT NULL,
            completed_at TEXT,
            duration_ms INTEGER,
            records_fetched INTEGER NOT NULL DEFAULT 0,
            records_created INTEGER NOT NULL DEFAULT 0,
            records_updated INTEGER NOT NULL DEFAULT 0,
            errors TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_teams_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS teams (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_agents_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agents (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            team_id TEXT REFERENCES teams(id),
            name TEXT NOT NULL,
            email TEXT,
            crm_user_id TEXT,
            created_at TEXT NOT NULL,
            UNIQUE(tenant_id, crm_user_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Reporting views consumed by downstream readers. Pure derivations; the
/// pipeline maintains them only by keeping the underlying tables correct.
pub async fn create_reporting_views(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE VIEW IF NOT EXISTS v_source_summary AS
        SELECT
            cl.tenant_id,
            ls.slug AS source_slug,
            COUNT(*) AS total_leads,
            SUM(CASE WHEN cl.match_status = 'matched' THEN 1 ELSE 0 END) AS matched,
            SUM(CASE WHEN cl.match_status = 'unmatched' THEN 1 ELSE 0 END) AS unmatched,
            SUM(CASE WHEN cl.match_status IN ('review', 'multiple') THEN 1 ELSE 0 END) AS in_review,
            AVG(cl.match_confidence) AS avg_confidence
        FROM canonical_leads cl
        JOIN lead_sources ls ON ls.id = cl.lead_source_id
        GROUP BY cl.tenant_id, ls.slug
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE VIEW IF NOT EXISTS v_team_summary AS
        SELECT
            m.tenant_id,
            t.name AS team_name,
            m.attributed_team_id,
            COUNT(*) AS match_count,
            AVG(m.confidence) AS avg_confidence
        FROM lead_matches m
        LEFT JOIN teams t ON t.id = m.attributed_team_id
        WHERE m.status = 'active'
        GROUP BY m.tenant_id, m.attributed_team_id
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE VIEW IF NOT EXISTS v_agent_summary AS
        SELECT
            m.tenant_id,
            a.name AS agent_name,
            m.attributed_agent_id,
            COUNT(*) AS match_count,
            AVG(m.confidence) AS avg_confidence
        FROM lead_matches m
        LEFT JOIN agents a ON a.id = m.attributed_agent_id
        WHERE m.status = 'active'
        GROUP BY m.tenant_id, m.attributed_agent_id
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE VIEW IF NOT EXISTS v_ingestion_summary AS
        SELECT
            b.tenant_id,
            b.id AS batch_id,
            ls.slug AS source_slug,
            b.file_name,
            b.status,
            b.total_rows,
            b.valid_rows,
            b.duplicate_rows,
            b.error_rows,
            b.received_at
        FROM ingestion_batches b
        JOIN lead_sources ls ON ls.id = b.lead_source_id
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE VIEW IF NOT EXISTS v_review_queue AS
        SELECT
            mc.tenant_id,
            mc.id AS candidate_id,
            mc.canonical_lead_id,
            mc.crm_lead_id,
            mc.match_type,
            mc.confidence_score,
            mc.expires_at,
            cl.first_name AS lead_first_name,
            cl.last_name AS lead_last_name,
            cl.email AS lead_email,
            crm.first_name AS crm_first_name,
            crm.last_name AS crm_last_name,
            crm.email AS crm_email
        FROM match_candidates mc
        JOIN canonical_leads cl ON cl.id = mc.canonical_lead_id
        JOIN crm_leads crm ON crm.id = mc.crm_lead_id
        WHERE mc.status = 'pending'
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the full schema. Safe to call repeatedly.
pub async fn create_all_tables(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_lead_sources_table(pool).await?;
    create_ingestion_batches_table(pool).await?;
    create_raw_rows_table(pool).await?;
    create_canonical_leads_table(pool).await?;
    create_crm_connections_table(pool).await?;
    create_crm_leads_table(pool).await?;
    create_lead_matches_table(pool).await?;
    create_match_candidates_table(pool).await?;
    create_lineage_entries_table(pool).await?;
    create_embedding_tasks_table(pool).await?;
    create_sync_logs_table(pool).await?;
    create_teams_table(pool).await?;
    create_agents_table(pool).await?;
    create_reporting_views(pool).await?;

    tracing::info!("Database tables initialized");

    Ok(())
}
