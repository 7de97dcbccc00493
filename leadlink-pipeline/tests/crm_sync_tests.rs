//! CRM pull sync integration tests against a mock CRM server.

mod helpers;

use helpers::*;

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use leadlink_pipeline::db::crm;
use leadlink_pipeline::services::CrmPuller;

async fn seed_connection_for(
    pool: &sqlx::SqlitePool,
    tenant_id: &str,
    base_url: &str,
) -> String {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO crm_connections
            (id, tenant_id, name, base_url, api_key, active, created_at, updated_at)
        VALUES (?, ?, 'Mock CRM', ?, 'test-key', 1, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(tenant_id)
    .bind(base_url)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .unwrap();
    id
}

fn people_page(people: serde_json::Value, offset: i64, total: i64) -> serde_json::Value {
    json!({
        "_metadata": { "offset": offset, "limit": 100, "total": total },
        "people": people,
    })
}

#[tokio::test]
async fn test_full_sync_mirrors_people_and_logs() {
    let (_dir, state) = setup().await;
    let tenant = new_tenant();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/identity"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "account": "test" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_metadata": { "offset": 0, "limit": 100, "total": 1 },
            "users": [{ "id": 42, "name": "Agent A", "email": "agent@x.com" }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/people"))
        .respond_with(ResponseTemplate::new(200).set_body_json(people_page(
            json!([
                {
                    "id": 1,
                    "firstName": "John",
                    "lastName": "Smith",
                    "emails": [{ "value": "John.Smith@Example.COM" }],
                    "phones": [{ "value": "(555) 123-4567" }],
                    "addresses": [{ "street": "123 Main St", "city": "Springfield" }],
                    "assignedUserId": 42,
                    "stage": "Lead",
                    "updated": "2024-01-01T00:00:00Z"
                },
                {
                    "id": 2,
                    "firstName": "Jane",
                    "lastName": "Doe",
                    "emails": [],
                    "phones": [],
                    "addresses": [],
                    "stage": "Hot",
                    "updated": "2024-01-02T00:00:00Z"
                }
            ]),
            0,
            2,
        )))
        .mount(&server)
        .await;

    let conn_id = seed_connection_for(&state.db, &tenant, &server.uri()).await;
    let connection = crm::get_connection(&state.db, &conn_id).await.unwrap().unwrap();

    let puller = CrmPuller::new(
        state.db.clone(),
        state.event_bus.clone(),
        std::time::Duration::from_secs(5),
    );
    let stats = puller.sync_connection(&connection, false).await.unwrap();

    assert_eq!(stats.records_fetched, 2);
    assert_eq!(stats.records_created, 2);
    assert_eq!(stats.records_updated, 0);
    assert!(stats.errors.is_empty());

    // Mirrored rows are normalized and carry resolved assignment
    let lead = crm::find_lead_by_external_id(&state.db, &conn_id, "1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lead.email_normalized.as_deref(), Some("john.smith@example.com"));
    assert_eq!(lead.phone_normalized.as_deref(), Some("5551234567"));
    assert_eq!(lead.assigned_user_id.as_deref(), Some("42"));
    assert_eq!(lead.assigned_user_name.as_deref(), Some("Agent A"));

    // Both rows enqueued for embedding
    let queued: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM embedding_tasks WHERE table_name = 'crm_leads'")
            .fetch_one(&state.db)
            .await
            .unwrap();
    assert_eq!(queued, 2);

    // Sync log and connection state
    let log: (String, String, i64) = sqlx::query_as(
        "SELECT sync_type, status, records_fetched FROM sync_logs WHERE crm_connection_id = ?",
    )
    .bind(&conn_id)
    .fetch_one(&state.db)
    .await
    .unwrap();
    assert_eq!(log.0, "full");
    assert_eq!(log.1, "completed");
    assert_eq!(log.2, 2);

    let connection = crm::get_connection(&state.db, &conn_id).await.unwrap().unwrap();
    assert!(connection.last_sync_at.is_some());
    assert_eq!(connection.last_sync_status.as_deref(), Some("completed"));
}

#[tokio::test]
async fn test_second_sync_is_incremental_and_skips_unchanged() {
    let (_dir, state) = setup().await;
    let tenant = new_tenant();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/identity"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_metadata": { "offset": 0, "limit": 100, "total": 0 },
            "users": []
        })))
        .mount(&server)
        .await;

    let person = json!([{
        "id": 1,
        "firstName": "John",
        "lastName": "Smith",
        "emails": [{ "value": "j@x.com" }],
        "stage": "Lead",
        "updated": "2024-01-01T00:00:00Z"
    }]);

    // Incremental requests carry updatedAfter; the first (full) does not
    Mock::given(method("GET"))
        .and(path("/people"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(people_page(person, 0, 1)))
        .mount(&server)
        .await;

    let conn_id = seed_connection_for(&state.db, &tenant, &server.uri()).await;
    let puller = CrmPuller::new(
        state.db.clone(),
        state.event_bus.clone(),
        std::time::Duration::from_secs(5),
    );

    let connection = crm::get_connection(&state.db, &conn_id).await.unwrap().unwrap();
    let first = puller.sync_connection(&connection, false).await.unwrap();
    assert_eq!(first.records_created, 1);

    // Second run: last_sync_at is set, so the incremental path runs and
    // the unchanged record is neither created nor updated.
    let connection = crm::get_connection(&state.db, &conn_id).await.unwrap().unwrap();
    assert!(connection.last_sync_at.is_some());

    let second = puller.sync_connection(&connection, false).await.unwrap();
    assert_eq!(second.records_fetched, 1);
    assert_eq!(second.records_created, 0);
    assert_eq!(second.records_updated, 0);

    let sync_types: Vec<(String,)> = sqlx::query_as(
        "SELECT sync_type FROM sync_logs WHERE crm_connection_id = ? ORDER BY started_at",
    )
    .bind(&conn_id)
    .fetch_all(&state.db)
    .await
    .unwrap();
    assert_eq!(sync_types[0].0, "full");
    assert_eq!(sync_types[1].0, "incremental");

    // Only one row mirrored, one embedding task
    let lead_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM crm_leads WHERE tenant_id = ?")
        .bind(&tenant)
        .fetch_one(&state.db)
        .await
        .unwrap();
    assert_eq!(lead_count, 1);
}

#[tokio::test]
async fn test_changed_record_updates_in_place() {
    let (_dir, state) = setup().await;
    let tenant = new_tenant();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/identity"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_metadata": { "offset": 0, "limit": 100, "total": 0 },
            "users": []
        })))
        .mount(&server)
        .await;

    // First response: stage Lead; afterwards: stage Hot
    Mock::given(method("GET"))
        .and(path("/people"))
        .respond_with(ResponseTemplate::new(200).set_body_json(people_page(
            json!([{ "id": 1, "firstName": "John", "stage": "Lead", "updated": "2024-01-01T00:00:00Z" }]),
            0,
            1,
        )))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/people"))
        .respond_with(ResponseTemplate::new(200).set_body_json(people_page(
            json!([{ "id": 1, "firstName": "John", "stage": "Hot", "updated": "2024-02-01T00:00:00Z" }]),
            0,
            1,
        )))
        .mount(&server)
        .await;

    let conn_id = seed_connection_for(&state.db, &tenant, &server.uri()).await;
    let puller = CrmPuller::new(
        state.db.clone(),
        state.event_bus.clone(),
        std::time::Duration::from_secs(5),
    );

    let connection = crm::get_connection(&state.db, &conn_id).await.unwrap().unwrap();
    puller.sync_connection(&connection, false).await.unwrap();

    let connection = crm::get_connection(&state.db, &conn_id).await.unwrap().unwrap();
    let stats = puller.sync_connection(&connection, false).await.unwrap();
    assert_eq!(stats.records_created, 0);
    assert_eq!(stats.records_updated, 1);

    let lead = crm::find_lead_by_external_id(&state.db, &conn_id, "1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lead.stage.as_deref(), Some("Hot"));
}

#[tokio::test]
async fn test_invalid_credentials_fail_the_sync() {
    let (_dir, state) = setup().await;
    let tenant = new_tenant();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/identity"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let conn_id = seed_connection_for(&state.db, &tenant, &server.uri()).await;
    let puller = CrmPuller::new(
        state.db.clone(),
        state.event_bus.clone(),
        std::time::Duration::from_secs(5),
    );

    let connection = crm::get_connection(&state.db, &conn_id).await.unwrap().unwrap();
    let stats = puller.sync_connection(&connection, false).await.unwrap();
    assert!(!stats.errors.is_empty());

    let status: String =
        sqlx::query_scalar("SELECT status FROM sync_logs WHERE crm_connection_id = ?")
            .bind(&conn_id)
            .fetch_one(&state.db)
            .await
            .unwrap();
    assert_eq!(status, "failed");

    // A failed sync never advances last_sync_at
    let connection = crm::get_connection(&state.db, &conn_id).await.unwrap().unwrap();
    assert!(connection.last_sync_at.is_none());
    assert_eq!(connection.last_sync_status.as_deref(), Some("failed"));
}
