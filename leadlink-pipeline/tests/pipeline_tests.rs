//! End-to-end pipeline tests: stage → parse → transform → match, plus
//! embedding retry and review resolution.

mod helpers;

use helpers::*;

use leadlink_pipeline::db::{batches, embedding_queue, leads, lineage, matches, raw_rows};
use leadlink_pipeline::services::{
    BlobStore, EmbeddingWorker, IngestionStager, Matcher, ReviewResolver, Transformer,
};
use leadlink_pipeline::AppState;

fn stager(state: &AppState) -> IngestionStager {
    IngestionStager::new(
        state.db.clone(),
        BlobStore::new(state.config.storage_root.clone()),
        state.event_bus.clone(),
    )
}

fn matcher(state: &AppState) -> Matcher {
    Matcher::new(
        state.db.clone(),
        state.event_bus.clone(),
        state.config.workers.candidate_ttl_days,
    )
}

/// Stage one CSV and run it through parse + transform + match.
async fn run_pipeline(state: &AppState, tenant: &str, csv: &str) -> String {
    let outcome = stager(state)
        .stage_csv(tenant, "zillow", "leads.csv", csv.as_bytes(), None)
        .await
        .unwrap();

    stager(state).process_pending().await.unwrap();
    Transformer::new(state.db.clone(), state.event_bus.clone())
        .process_parsed()
        .await
        .unwrap();
    matcher(state).run_pending().await.unwrap();

    outcome.batch_id
}

#[tokio::test]
async fn test_auto_match_on_email_with_attribution() {
    let (_dir, state) = setup().await;
    let tenant = new_tenant();
    seed_source(&state.db, &tenant).await;
    let conn = seed_crm_connection(&state.db, &tenant).await;
    let crm_id = seed_crm_lead(
        &state.db,
        &tenant,
        &conn,
        "42",
        Some("john.smith@example.com"),
        None,
        None,
        Some("42"),
    )
    .await;
    let (team_id, agent_id) = seed_team_and_agent(&state.db, &tenant, "42").await;

    let csv = "First Name,Last Name,Email,Phone,Address\n\
               John,Smith,John.Smith@Example.COM,5551234567,123 Main St\n";
    run_pipeline(&state, &tenant, csv).await;

    // Exactly one canonical lead, matched at full confidence
    let lead: (String, String, f64) = sqlx::query_as(
        "SELECT id, match_status, match_confidence FROM canonical_leads WHERE tenant_id = ?",
    )
    .bind(&tenant)
    .fetch_one(&state.db)
    .await
    .unwrap();
    assert_eq!(lead.1, "matched");
    assert_eq!(lead.2, 1.0);

    let m = matches::active_match_for_canonical(&state.db, &lead.0)
        .await
        .unwrap()
        .expect("active match must exist");
    assert_eq!(m.crm_lead_id, crm_id);
    assert_eq!(m.match_type, "email_exact");
    assert_eq!(m.confidence, 1.0);
    assert_eq!(m.matched_by, "system");
    assert_eq!(m.attributed_team_id.as_deref(), Some(team_id.as_str()));
    assert_eq!(m.attributed_agent_id.as_deref(), Some(agent_id.as_str()));

    // No candidates were opened on the auto path
    let candidates = matches::pending_candidates_for(&state.db, &lead.0)
        .await
        .unwrap();
    assert!(candidates.is_empty());

    // Lineage: one create from the raw row, one to the match
    let to_lead = lineage::fetch_for_target(&state.db, "canonical_leads", &lead.0)
        .await
        .unwrap();
    assert_eq!(to_lead.len(), 1);
    assert_eq!(to_lead[0].source_table, "raw_rows");
    assert_eq!(to_lead[0].operation, "create");

    let to_match = lineage::fetch_for_target(&state.db, "lead_matches", &m.id)
        .await
        .unwrap();
    assert_eq!(to_match.len(), 1);
    assert_eq!(to_match[0].source_id, lead.0);
}

#[tokio::test]
async fn test_matcher_rerun_on_matched_lead_is_noop() {
    let (_dir, state) = setup().await;
    let tenant = new_tenant();
    seed_source(&state.db, &tenant).await;
    let conn = seed_crm_connection(&state.db, &tenant).await;
    seed_crm_lead(
        &state.db,
        &tenant,
        &conn,
        "42",
        Some("a@b.com"),
        None,
        None,
        None,
    )
    .await;

    let csv = "First Name,Last Name,Email,Phone,Address\nA,B,a@b.com,,\n";
    run_pipeline(&state, &tenant, csv).await;

    let before: (String, String, Option<String>) = sqlx::query_as(
        "SELECT id, match_status, updated_at FROM canonical_leads WHERE tenant_id = ?",
    )
    .bind(&tenant)
    .fetch_one(&state.db)
    .await
    .unwrap();
    let match_before = matches::active_match_for_canonical(&state.db, &before.0)
        .await
        .unwrap()
        .unwrap();
    let lineage_before = lineage::fetch_for_source(&state.db, "canonical_leads", &before.0)
        .await
        .unwrap()
        .len();

    // Explicit re-run on the already-matched lead
    let status = matcher(&state).match_lead(&before.0).await.unwrap();
    assert_eq!(status.as_str(), "matched");

    let after: (String, String, Option<String>) = sqlx::query_as(
        "SELECT id, match_status, updated_at FROM canonical_leads WHERE tenant_id = ?",
    )
    .bind(&tenant)
    .fetch_one(&state.db)
    .await
    .unwrap();
    let match_after = matches::active_match_for_canonical(&state.db, &after.0)
        .await
        .unwrap()
        .unwrap();
    let lineage_after = lineage::fetch_for_source(&state.db, "canonical_leads", &after.0)
        .await
        .unwrap()
        .len();

    assert_eq!(before, after);
    assert_eq!(match_before.id, match_after.id);
    assert_eq!(match_before.updated_at, match_after.updated_at);
    assert_eq!(lineage_before, lineage_after);
}

#[tokio::test]
async fn test_review_tier_on_fuzzy_address() {
    let (_dir, state) = setup().await;
    let tenant = new_tenant();
    seed_source(&state.db, &tenant).await;
    let conn = seed_crm_connection(&state.db, &tenant).await;
    let crm_id = seed_crm_lead(
        &state.db,
        &tenant,
        &conn,
        "7",
        None,
        None,
        Some("456 oak avenue"),
        None,
    )
    .await;

    // 10-digit phone with no CRM counterpart; address lands in the band
    let csv = "First Name,Last Name,Email,Phone,Address\n\
               Jane,Doe,jane.doe@nowhere.com,5550000000,456 Oak Ave\n";
    run_pipeline(&state, &tenant, csv).await;

    let lead: (String, String, f64) = sqlx::query_as(
        "SELECT id, match_status, match_confidence FROM canonical_leads WHERE tenant_id = ?",
    )
    .bind(&tenant)
    .fetch_one(&state.db)
    .await
    .unwrap();
    assert_eq!(lead.1, "review");

    let candidates = matches::pending_candidates_for(&state.db, &lead.0)
        .await
        .unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].crm_lead_id, crm_id);
    assert_eq!(candidates[0].match_type, "address_fuzzy");
    assert!(
        candidates[0].confidence_score >= 0.60 && candidates[0].confidence_score < 0.90,
        "confidence was {}",
        candidates[0].confidence_score
    );
    assert_eq!(lead.2, candidates[0].confidence_score);

    // No committed match
    assert!(matches::active_match_for_canonical(&state.db, &lead.0)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_unmatched_when_no_signals() {
    let (_dir, state) = setup().await;
    let tenant = new_tenant();
    seed_source(&state.db, &tenant).await;

    let csv = "First Name,Last Name,Email,Phone,Address\nA,B,a@b.com,555,\n";
    run_pipeline(&state, &tenant, csv).await;

    let status: String =
        sqlx::query_scalar("SELECT match_status FROM canonical_leads WHERE tenant_id = ?")
            .bind(&tenant)
            .fetch_one(&state.db)
            .await
            .unwrap();
    assert_eq!(status, "unmatched");
}

#[tokio::test]
async fn test_dedup_within_source() {
    let (_dir, state) = setup().await;
    let tenant = new_tenant();
    seed_source(&state.db, &tenant).await;

    let csv = "First Name,Last Name,Email,Phone,Address\n\
               John,Smith,dup@example.com,5551234567,123 Main St\n\
               Johnny,Smith,dup@example.com,5559876543,99 Other Rd\n";
    let batch_id = run_pipeline(&state, &tenant, csv).await;

    let batch = batches::get(&state.db, &batch_id).await.unwrap().unwrap();
    assert_eq!(batch.total_rows, 2);
    assert_eq!(batch.valid_rows, 2);
    assert_eq!(batch.duplicate_rows, 1);
    assert_eq!(batch.status, "completed");

    // One canonical lead; the second row points at it as a duplicate
    let lead_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM canonical_leads WHERE tenant_id = ?")
            .bind(&tenant)
            .fetch_one(&state.db)
            .await
            .unwrap();
    assert_eq!(lead_count, 1);

    let rows = raw_rows::fetch_for_batch(&state.db, &batch_id).await.unwrap();
    assert_eq!(rows.len(), 2);

    let first = &rows[0];
    let second = &rows[1];
    assert!(!first.is_duplicate);
    assert!(first.canonical_lead_id.is_some());

    assert!(second.is_duplicate);
    assert_eq!(second.duplicate_of, first.canonical_lead_id);
    assert!(second.canonical_lead_id.is_none());
}

#[tokio::test]
async fn test_idempotent_staging() {
    let (_dir, state) = setup().await;
    let tenant = new_tenant();
    seed_source(&state.db, &tenant).await;

    let csv = "First Name,Last Name,Email,Phone,Address\nA,B,a@b.com,,\n";

    let first = stager(&state)
        .stage_csv(&tenant, "zillow", "leads.csv", csv.as_bytes(), None)
        .await
        .unwrap();
    assert!(!first.deduplicated);

    stager(&state).process_pending().await.unwrap();
    let rows_before = raw_rows::count_for_batch(&state.db, &first.batch_id)
        .await
        .unwrap();
    let log_before: String =
        sqlx::query_scalar("SELECT log FROM ingestion_batches WHERE id = ?")
            .bind(&first.batch_id)
            .fetch_one(&state.db)
            .await
            .unwrap();

    // Same bytes, different filename: still the same batch
    let second = stager(&state)
        .stage_csv(&tenant, "zillow", "renamed.csv", csv.as_bytes(), None)
        .await
        .unwrap();
    assert!(second.deduplicated);
    assert_eq!(second.batch_id, first.batch_id);

    let rows_after = raw_rows::count_for_batch(&state.db, &first.batch_id)
        .await
        .unwrap();
    let log_after: String =
        sqlx::query_scalar("SELECT log FROM ingestion_batches WHERE id = ?")
            .bind(&first.batch_id)
            .fetch_one(&state.db)
            .await
            .unwrap();

    assert_eq!(rows_before, rows_after);
    assert_eq!(log_before, log_after);

    let batch_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM ingestion_batches WHERE tenant_id = ?")
            .bind(&tenant)
            .fetch_one(&state.db)
            .await
            .unwrap();
    assert_eq!(batch_count, 1);
}

#[tokio::test]
async fn test_invalid_rows_counted_not_fatal() {
    let (_dir, state) = setup().await;
    let tenant = new_tenant();
    seed_source(&state.db, &tenant).await;

    // Second row has no email (required); third has a malformed one
    let csv = "First Name,Last Name,Email,Phone,Address\n\
               A,B,a@b.com,,\n\
               C,D,,,\n\
               E,F,not-an-email,,\n";
    let batch_id = run_pipeline(&state, &tenant, csv).await;

    let batch = batches::get(&state.db, &batch_id).await.unwrap().unwrap();
    assert_eq!(batch.status, "completed");
    assert_eq!(batch.total_rows, 3);
    assert_eq!(batch.parsed_rows, 3);
    assert_eq!(batch.valid_rows, 1);

    let rows = raw_rows::fetch_for_batch(&state.db, &batch_id).await.unwrap();
    assert!(rows[0].is_valid);
    assert!(!rows[1].is_valid);
    assert!(!rows[2].is_valid);

    // Only the valid row produced a canonical lead
    let lead_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM canonical_leads WHERE tenant_id = ?")
            .bind(&tenant)
            .fetch_one(&state.db)
            .await
            .unwrap();
    assert_eq!(lead_count, 1);
}

#[tokio::test]
async fn test_unparsable_file_fails_batch() {
    let (_dir, state) = setup().await;
    let tenant = new_tenant();
    seed_source(&state.db, &tenant).await;

    // Empty payload cannot produce a header row
    let outcome = stager(&state)
        .stage_csv(&tenant, "zillow", "empty.csv", b"", None)
        .await
        .unwrap();
    stager(&state).process_pending().await.unwrap();

    let batch = batches::get(&state.db, &outcome.batch_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.status, "failed");

    let errors: Vec<serde_json::Value> = serde_json::from_str(&batch.errors).unwrap();
    assert!(!errors.is_empty());
}

#[tokio::test]
async fn test_embedding_retry_completes_on_second_pass() {
    let (_dir, state) = setup().await;
    let tenant = new_tenant();
    seed_source(&state.db, &tenant).await;

    let csv = "First Name,Last Name,Email,Phone,Address\nA,B,a@b.com,5551234567,1 Elm St\n";
    run_pipeline(&state, &tenant, csv).await;

    let lead_id: String = sqlx::query_scalar("SELECT id FROM canonical_leads WHERE tenant_id = ?")
        .bind(&tenant)
        .fetch_one(&state.db)
        .await
        .unwrap();

    let task = embedding_queue::get_by_record(&state.db, "canonical_leads", &lead_id)
        .await
        .unwrap()
        .expect("transform must enqueue an embedding task");
    assert_eq!(task.status, "pending");

    let provider = FakeEmbeddingProvider::new(8, 1);
    let worker = EmbeddingWorker::new(
        state.db.clone(),
        provider.clone(),
        state.event_bus.clone(),
        state.config.workers.embed_batch_size,
        state.config.workers.max_attempts,
    );

    // First pass: provider fails, task reverts with one attempt spent
    let stats = worker.run_once().await.unwrap();
    assert_eq!(stats.claimed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.pending_count, 1);

    let task = embedding_queue::get(&state.db, &task.id).await.unwrap().unwrap();
    assert_eq!(task.status, "pending");
    assert_eq!(task.attempts, 1);
    assert!(task.last_error.is_some());

    // Second pass: completes with attempts still at 1
    let stats = worker.run_once().await.unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.pending_count, 0);

    let task = embedding_queue::get(&state.db, &task.id).await.unwrap().unwrap();
    assert_eq!(task.status, "completed");
    assert_eq!(task.attempts, 1);

    let (embedding, embedding_text): (Option<Vec<u8>>, Option<String>) =
        sqlx::query_as("SELECT embedding, embedding_text FROM canonical_leads WHERE id = ?")
            .bind(&lead_id)
            .fetch_one(&state.db)
            .await
            .unwrap();
    let embedding = embedding.expect("embedding must be written");
    assert_eq!(embedding.len(), 8 * 4);
    assert_eq!(embedding_text.as_deref(), Some(task.text_to_embed.as_str()));

    assert_eq!(provider.call_count(), 2);
}

#[tokio::test]
async fn test_embedding_task_parks_failed_at_max_attempts() {
    let (_dir, state) = setup().await;
    let tenant = new_tenant();
    seed_source(&state.db, &tenant).await;

    let csv = "First Name,Last Name,Email,Phone,Address\nA,B,a@b.com,,\n";
    run_pipeline(&state, &tenant, csv).await;

    let provider = FakeEmbeddingProvider::new(8, usize::MAX);
    let worker = EmbeddingWorker::new(
        state.db.clone(),
        provider,
        state.event_bus.clone(),
        50,
        3,
    );

    for _ in 0..3 {
        worker.run_once().await.unwrap();
    }

    let (pending, failed) = embedding_queue::stats(&state.db).await.unwrap();
    assert_eq!(pending, 0);
    assert_eq!(failed, 1);

    // A fourth pass claims nothing
    let stats = worker.run_once().await.unwrap();
    assert_eq!(stats.claimed, 0);
}

#[tokio::test]
async fn test_approval_cancels_siblings() {
    let (_dir, state) = setup().await;
    let tenant = new_tenant();
    seed_source(&state.db, &tenant).await;
    let conn = seed_crm_connection(&state.db, &tenant).await;

    // Three addresses inside the review band against "456 oak ave"
    let low = seed_crm_lead(&state.db, &tenant, &conn, "1", None, None, Some("456 oak avenue"), None).await;
    let mid = seed_crm_lead(&state.db, &tenant, &conn, "2", None, None, Some("456 oak avene"), None).await;
    let high = seed_crm_lead(&state.db, &tenant, &conn, "3", None, None, Some("456 oakk ave"), None).await;

    let csv = "First Name,Last Name,Email,Phone,Address\n\
               Jane,Doe,jane@nowhere.com,,456 Oak Ave\n";
    run_pipeline(&state, &tenant, csv).await;

    let lead: (String, String) =
        sqlx::query_as("SELECT id, match_status FROM canonical_leads WHERE tenant_id = ?")
            .bind(&tenant)
            .fetch_one(&state.db)
            .await
            .unwrap();
    assert_eq!(lead.1, "multiple");

    let candidates = matches::pending_candidates_for(&state.db, &lead.0)
        .await
        .unwrap();
    assert_eq!(candidates.len(), 3);

    // Approve the middle-scored candidate
    let middle = candidates
        .iter()
        .find(|c| c.crm_lead_id == mid)
        .unwrap()
        .clone();

    let resolver = ReviewResolver::new(state.db.clone(), state.event_bus.clone());
    let match_id = resolver
        .approve(&middle.id, "reviewer-1", Some("looks right"))
        .await
        .unwrap();

    let m = matches::get_match(&state.db, &match_id).await.unwrap().unwrap();
    assert_eq!(m.matched_by, "manual");
    assert_eq!(m.match_type, "manual");
    assert_eq!(m.crm_lead_id, mid);
    assert_eq!(m.confidence, middle.confidence_score);
    assert_eq!(m.matched_by_user_id.as_deref(), Some("reviewer-1"));

    let lead_after: (String, f64) =
        sqlx::query_as("SELECT match_status, match_confidence FROM canonical_leads WHERE id = ?")
            .bind(&lead.0)
            .fetch_one(&state.db)
            .await
            .unwrap();
    assert_eq!(lead_after.0, "matched");
    assert_eq!(lead_after.1, middle.confidence_score);

    // Siblings are rejected, the approved one records its match
    for crm_id in [&low, &high] {
        let status: String = sqlx::query_scalar(
            "SELECT status FROM match_candidates WHERE canonical_lead_id = ? AND crm_lead_id = ?",
        )
        .bind(&lead.0)
        .bind(crm_id)
        .fetch_one(&state.db)
        .await
        .unwrap();
        assert_eq!(status, "rejected");
    }

    let approved: (String, Option<String>) = sqlx::query_as(
        "SELECT status, lead_match_id FROM match_candidates WHERE id = ?",
    )
    .bind(&middle.id)
    .fetch_one(&state.db)
    .await
    .unwrap();
    assert_eq!(approved.0, "approved");
    assert_eq!(approved.1.as_deref(), Some(match_id.as_str()));

    // A second approval on the settled candidate conflicts
    let err = resolver.approve(&middle.id, "reviewer-2", None).await;
    assert!(matches!(err, Err(leadlink_common::Error::Conflict(_))));
}

#[tokio::test]
async fn test_reject_last_candidate_reverts_to_unmatched() {
    let (_dir, state) = setup().await;
    let tenant = new_tenant();
    seed_source(&state.db, &tenant).await;
    let conn = seed_crm_connection(&state.db, &tenant).await;
    seed_crm_lead(&state.db, &tenant, &conn, "1", None, None, Some("456 oak avenue"), None).await;

    let csv = "First Name,Last Name,Email,Phone,Address\n\
               Jane,Doe,jane@nowhere.com,,456 Oak Ave\n";
    run_pipeline(&state, &tenant, csv).await;

    let lead_id: String = sqlx::query_scalar("SELECT id FROM canonical_leads WHERE tenant_id = ?")
        .bind(&tenant)
        .fetch_one(&state.db)
        .await
        .unwrap();
    let candidates = matches::pending_candidates_for(&state.db, &lead_id)
        .await
        .unwrap();
    assert_eq!(candidates.len(), 1);

    let resolver = ReviewResolver::new(state.db.clone(), state.event_bus.clone());
    resolver
        .reject(&candidates[0].id, "reviewer-1", Some("wrong person"))
        .await
        .unwrap();

    let (status, confidence): (String, Option<f64>) =
        sqlx::query_as("SELECT match_status, match_confidence FROM canonical_leads WHERE id = ?")
            .bind(&lead_id)
            .fetch_one(&state.db)
            .await
            .unwrap();
    assert_eq!(status, "unmatched");
    assert_eq!(confidence, None);
}

#[tokio::test]
async fn test_candidate_ttl_expiry_sweep() {
    let (_dir, state) = setup().await;
    let tenant = new_tenant();
    seed_source(&state.db, &tenant).await;
    let conn = seed_crm_connection(&state.db, &tenant).await;
    seed_crm_lead(&state.db, &tenant, &conn, "1", None, None, Some("456 oak avenue"), None).await;

    let csv = "First Name,Last Name,Email,Phone,Address\n\
               Jane,Doe,jane@nowhere.com,,456 Oak Ave\n";
    run_pipeline(&state, &tenant, csv).await;

    let lead_id: String = sqlx::query_scalar("SELECT id FROM canonical_leads WHERE tenant_id = ?")
        .bind(&tenant)
        .fetch_one(&state.db)
        .await
        .unwrap();
    let candidates = matches::pending_candidates_for(&state.db, &lead_id)
        .await
        .unwrap();
    assert_eq!(candidates.len(), 1);

    // Force the TTL into the past
    sqlx::query("UPDATE match_candidates SET expires_at = ? WHERE id = ?")
        .bind((chrono::Utc::now() - chrono::Duration::hours(1)).to_rfc3339())
        .bind(&candidates[0].id)
        .execute(&state.db)
        .await
        .unwrap();

    let resolver = ReviewResolver::new(state.db.clone(), state.event_bus.clone());
    let expired = resolver.expire_overdue().await.unwrap();
    assert_eq!(expired, 1);

    let candidate_status: String =
        sqlx::query_scalar("SELECT status FROM match_candidates WHERE id = ?")
            .bind(&candidates[0].id)
            .fetch_one(&state.db)
            .await
            .unwrap();
    assert_eq!(candidate_status, "expired");

    let lead_status: String =
        sqlx::query_scalar("SELECT match_status FROM canonical_leads WHERE id = ?")
            .bind(&lead_id)
            .fetch_one(&state.db)
            .await
            .unwrap();
    assert_eq!(lead_status, "unmatched");
}

#[tokio::test]
async fn test_matcher_claim_is_exclusive_and_reapable() {
    let (_dir, state) = setup().await;
    let tenant = new_tenant();
    seed_source(&state.db, &tenant).await;

    // Stage and transform, but do not match yet
    let csv = "First Name,Last Name,Email,Phone,Address\nA,B,a@b.com,,\n";
    stager(&state)
        .stage_csv(&tenant, "zillow", "leads.csv", csv.as_bytes(), None)
        .await
        .unwrap();
    stager(&state).process_pending().await.unwrap();
    Transformer::new(state.db.clone(), state.event_bus.clone())
        .process_parsed()
        .await
        .unwrap();

    // First claim takes the lead; a racing second claim gets nothing
    let claimed = leads::claim_pending_match(&state.db, 100).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].match_status, "processing");

    let racing = leads::claim_pending_match(&state.db, 100).await.unwrap();
    assert!(racing.is_empty());

    // A matcher pass sees no pending work while the claim is held
    let stats = matcher(&state).run_pending().await.unwrap();
    assert_eq!(stats.processed, 0);

    // Crashed-worker claim: backdate and reap, then the matcher settles it
    sqlx::query("UPDATE canonical_leads SET updated_at = ? WHERE id = ?")
        .bind((chrono::Utc::now() - chrono::Duration::hours(1)).to_rfc3339())
        .bind(&claimed[0].id)
        .execute(&state.db)
        .await
        .unwrap();

    let cutoff = (chrono::Utc::now() - chrono::Duration::minutes(10)).to_rfc3339();
    let reaped = leads::reap_stale(&state.db, &cutoff).await.unwrap();
    assert_eq!(reaped, 1);

    let stats = matcher(&state).run_pending().await.unwrap();
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.unmatched, 1);
}

#[tokio::test]
async fn test_one_active_match_per_canonical_enforced() {
    let (_dir, state) = setup().await;
    let tenant = new_tenant();
    seed_source(&state.db, &tenant).await;
    let conn = seed_crm_connection(&state.db, &tenant).await;
    let first_crm = seed_crm_lead(&state.db, &tenant, &conn, "1", Some("a@b.com"), None, None, None).await;
    let second_crm = seed_crm_lead(&state.db, &tenant, &conn, "2", Some("a@b.com"), None, None, None).await;

    let csv = "First Name,Last Name,Email,Phone,Address\nA,B,a@b.com,,\n";
    run_pipeline(&state, &tenant, csv).await;

    let lead_id: String = sqlx::query_scalar("SELECT id FROM canonical_leads WHERE tenant_id = ?")
        .bind(&tenant)
        .fetch_one(&state.db)
        .await
        .unwrap();
    let existing = matches::active_match_for_canonical(&state.db, &lead_id)
        .await
        .unwrap()
        .unwrap();

    // A second active match for the same canonical, even against a
    // different CRM lead, is rejected by the schema
    let other_crm = if existing.crm_lead_id == first_crm {
        second_crm
    } else {
        first_crm
    };
    let mut tx = state.db.begin().await.unwrap();
    let result = matches::insert_match(
        &mut tx,
        &matches::NewLeadMatch {
            tenant_id: tenant.clone(),
            canonical_lead_id: lead_id.clone(),
            crm_lead_id: other_crm,
            match_type: "email_exact".to_string(),
            confidence: 1.0,
            match_details: "{}".to_string(),
            matched_by: "system".to_string(),
            matched_by_user_id: None,
            attributed_team_id: None,
            attributed_agent_id: None,
        },
    )
    .await;
    assert!(matches!(result, Err(leadlink_common::Error::Database(_))));
    tx.rollback().await.unwrap();

    // The original match is untouched
    let still = matches::active_match_for_canonical(&state.db, &lead_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(still.id, existing.id);
}

#[tokio::test]
async fn test_rows_transform_in_row_number_order() {
    let (_dir, state) = setup().await;
    let tenant = new_tenant();
    seed_source(&state.db, &tenant).await;

    let csv = "First Name,Last Name,Email,Phone,Address\n\
               A,One,a1@x.com,,\n\
               B,Two,b2@x.com,,\n\
               C,Three,c3@x.com,,\n";
    run_pipeline(&state, &tenant, csv).await;

    let created: Vec<(String,)> = sqlx::query_as(
        "SELECT last_name FROM canonical_leads WHERE tenant_id = ? ORDER BY created_at, rowid",
    )
    .bind(&tenant)
    .fetch_all(&state.db)
    .await
    .unwrap();
    let names: Vec<&str> = created.iter().map(|(n,)| n.as_str()).collect();
    assert_eq!(names, ["One", "Two", "Three"]);
}
