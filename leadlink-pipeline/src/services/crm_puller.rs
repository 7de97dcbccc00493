//! CRM pull sync
//!
//! Mirrors the CRM's people into `crm_leads`, one connection at a time.
//! Incremental is the default once a connection has synced; a content hash
//! over the salient fields decides whether a record actually changed.
//! Inserted or changed rows enqueue for embedding.

use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::time::Duration;

use leadlink_common::db::models::{CrmConnection, SyncStatus};
use leadlink_common::events::{EventBus, PipelineEvent};
use leadlink_common::normalize;
use leadlink_common::Result;

use crate::db::{crm, embedding_queue};
use crate::models::SyncStats;
use crate::services::crm_client::{has_more_pages, CrmClient, CrmPerson};
use crate::services::ingestion_stager::parse_uuid;

/// Per-record errors stored on a sync log are capped here.
const MAX_STORED_ERRORS: usize = 100;

pub struct CrmPuller {
    db: SqlitePool,
    event_bus: EventBus,
    request_timeout: Duration,
}

impl CrmPuller {
    pub fn new(db: SqlitePool, event_bus: EventBus, request_timeout: Duration) -> Self {
        Self {
            db,
            event_bus,
            request_timeout,
        }
    }

    /// Sync every active connection. A connection-level failure is
    /// recorded on its sync log and does not stop the others.
    pub async fn sync_all(&self, force_full: bool) -> Result<Vec<SyncStats>> {
        let connections = crm::list_active_connections(&self.db).await?;

        let mut all_stats = Vec::new();
        for connection in connections {
            match self.sync_connection(&connection, force_full).await {
                Ok(stats) => all_stats.push(stats),
                Err(e) => {
                    tracing::error!(
                        crm_connection_id = %connection.id,
                        error = %e,
                        "CRM sync failed"
                    );
                }
            }
        }

        Ok(all_stats)
    }

    /// Run one sync for one connection.
    pub async fn sync_connection(
        &self,
        connection: &CrmConnection,
        force_full: bool,
    ) -> Result<SyncStats> {
        // The sync start instant is recorded explicitly: duration_ms and
        // the connection's next last_sync_at both derive from it.
        let sync_start = chrono::Utc::now();
        let started_at = sync_start.to_rfc3339();

        let incremental = !force_full && connection.last_sync_at.is_some();
        let sync_type = if incremental { "incremental" } else { "full" };
        let updated_after = if incremental {
            connection.last_sync_at.clone()
        } else {
            None
        };

        let sync_log_id = crm::insert_sync_log(
            &self.db,
            &connection.tenant_id,
            &connection.id,
            sync_type,
            &started_at,
        )
        .await?;

        tracing::info!(
            crm_connection_id = %connection.id,
            sync_type = sync_type,
            "CRM sync started"
        );

        let client = CrmClient::new(&connection.base_url, &connection.api_key, self.request_timeout)
            .map_err(leadlink_common::Error::from)?;

        let mut stats = SyncStats::default();

        // Credential check before any paging
        if let Err(e) = client.verify_credentials().await {
            stats.errors.push(e.to_string());
            self.finish(
                connection,
                &sync_log_id,
                SyncStatus::Failed,
                sync_start,
                None,
                &stats,
            )
            .await?;
            return Ok(stats);
        }

        // Assigned-user resolution map
        let users = match client.fetch_users().await {
            Ok(users) => users,
            Err(e) => {
                stats.errors.push(e.to_string());
                self.finish(
                    connection,
                    &sync_log_id,
                    SyncStatus::Failed,
                    sync_start,
                    None,
                    &stats,
                )
                .await?;
                return Ok(stats);
            }
        };
        let user_map: HashMap<i64, (Option<String>, Option<String>)> = users
            .into_iter()
            .map(|u| (u.id, (u.email, u.name)))
            .collect();

        // Page through people
        let mut offset: i64 = 0;
        loop {
            let page = match client
                .fetch_people_page(offset, updated_after.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    stats.errors.push(e.to_string());
                    self.finish(
                        connection,
                        &sync_log_id,
                        SyncStatus::Failed,
                        sync_start,
                        None,
                        &stats,
                    )
                    .await?;
                    return Ok(stats);
                }
            };

            let returned = page.people.len() as i64;
            stats.records_fetched += returned;

            for person in &page.people {
                if let Err(e) = self.upsert_person(connection, &user_map, person, &mut stats).await
                {
                    if stats.errors.len() < MAX_STORED_ERRORS {
                        stats.errors.push(format!("person {}: {}", person.id, e));
                    }
                }
            }

            if !has_more_pages(&page.metadata, returned) {
                break;
            }
            offset = page.metadata.offset + returned;
        }

        let status = if stats.errors.is_empty() {
            SyncStatus::Completed
        } else {
            SyncStatus::CompletedWithErrors
        };

        self.finish(
            connection,
            &sync_log_id,
            status,
            sync_start,
            Some(&started_at),
            &stats,
        )
        .await?;

        tracing::info!(
            crm_connection_id = %connection.id,
            fetched = stats.records_fetched,
            created = stats.records_created,
            updated = stats.records_updated,
            errors = stats.errors.len(),
            "CRM sync finished"
        );

        self.event_bus.emit_lossy(PipelineEvent::CrmSyncCompleted {
            tenant_id: parse_uuid(&connection.tenant_id),
            crm_connection_id: parse_uuid(&connection.id),
            sync_log_id: parse_uuid(&sync_log_id),
            status: status.as_str().to_string(),
            records_fetched: stats.records_fetched,
            timestamp: chrono::Utc::now(),
        });

        Ok(stats)
    }

    /// Transform and upsert one CRM person.
    async fn upsert_person(
        &self,
        connection: &CrmConnection,
        user_map: &HashMap<i64, (Option<String>, Option<String>)>,
        person: &CrmPerson,
        stats: &mut SyncStats,
    ) -> Result<()> {
        let lead = transform_person(connection, user_map, person);
        let external_id = lead.external_id.clone();

        match crm::find_lead_by_external_id(&self.db, &connection.id, &external_id).await? {
            None => {
                let id = crm::insert_lead(&self.db, &lead).await?;
                stats.records_created += 1;
                self.enqueue_embedding(&id, &lead).await?;
            }
            Some(existing) if existing.sync_hash != lead.sync_hash => {
                crm::update_lead(&self.db, &existing.id, &lead).await?;
                stats.records_updated += 1;
                self.enqueue_embedding(&existing.id, &lead).await?;
            }
            Some(_) => {
                // Content unchanged since last sync
            }
        }

        Ok(())
    }

    async fn enqueue_embedding(&self, crm_lead_id: &str, lead: &crm::NewCrmLead) -> Result<()> {
        let text = compose_embedding_text(lead);
        if !text.is_empty() {
            embedding_queue::enqueue(&self.db, "crm_leads", crm_lead_id, &text).await?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        connection: &CrmConnection,
        sync_log_id: &str,
        status: SyncStatus,
        sync_start: chrono::DateTime<chrono::Utc>,
        new_last_sync_at: Option<&str>,
        stats: &SyncStats,
    ) -> Result<()> {
        let completed = chrono::Utc::now();
        let duration_ms = (completed - sync_start).num_milliseconds();

        let stored_errors: Vec<&String> = stats.errors.iter().take(MAX_STORED_ERRORS).collect();

        crm::complete_sync_log(
            &self.db,
            sync_log_id,
            status,
            &completed.to_rfc3339(),
            duration_ms,
            stats.records_fetched,
            stats.records_created,
            stats.records_updated,
            &serde_json::to_string(&stored_errors)?,
        )
        .await?;

        crm::update_connection_sync_state(&self.db, &connection.id, new_last_sync_at, status)
            .await?;

        Ok(())
    }
}

/// Transform one CRM person into the mirror shape: first email, phone,
/// and address win; the assigned user resolves through the user map.
pub fn transform_person(
    connection: &CrmConnection,
    user_map: &HashMap<i64, (Option<String>, Option<String>)>,
    person: &CrmPerson,
) -> crm::NewCrmLead {
    let email = person
        .emails
        .first()
        .map(|e| e.value.clone())
        .filter(|v| !v.trim().is_empty());
    let phone = person
        .phones
        .first()
        .map(|p| p.value.clone())
        .filter(|v| !v.trim().is_empty());

    let address = person.addresses.first().map(|a| {
        [
            a.street.as_deref(),
            a.city.as_deref(),
            a.state.as_deref(),
            a.code.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|s| !s.trim().is_empty())
        .collect::<Vec<_>>()
        .join(", ")
    });

    let assigned_user_id = person.assigned_user_id.map(|id| id.to_string());
    let (assigned_user_email, assigned_user_name) = person
        .assigned_user_id
        .and_then(|id| user_map.get(&id).cloned())
        .unwrap_or((None, None));

    let sync_hash = compute_sync_hash(
        email.as_deref(),
        phone.as_deref(),
        person.first_name.as_deref(),
        person.last_name.as_deref(),
        person.stage.as_deref(),
        assigned_user_id.as_deref(),
        person.updated.as_deref(),
    );

    crm::NewCrmLead {
        tenant_id: connection.tenant_id.clone(),
        crm_connection_id: connection.id.clone(),
        external_id: person.id.to_string(),
        first_name: person.first_name.clone(),
        last_name: person.last_name.clone(),
        email_normalized: email.as_deref().and_then(normalize::normalize_email),
        email,
        phone_normalized: phone.as_deref().and_then(normalize::normalize_phone),
        phone,
        address_normalized: address.as_deref().and_then(normalize::clean_address),
        address,
        assigned_user_id,
        assigned_user_email,
        assigned_user_name,
        stage: person.stage.clone(),
        source: person.source.clone(),
        tags: serde_json::to_string(&person.tags).unwrap_or_else(|_| "[]".to_string()),
        sync_hash,
        crm_updated_at: person.updated.clone(),
    }
}

/// Stable digest over the fields whose change matters to matching.
pub fn compute_sync_hash(
    email: Option<&str>,
    phone: Option<&str>,
    first_name: Option<&str>,
    last_name: Option<&str>,
    stage: Option<&str>,
    assigned_user_id: Option<&str>,
    updated_at: Option<&str>,
) -> String {
    let joined = [
        email,
        phone,
        first_name,
        last_name,
        stage,
        assigned_user_id,
        updated_at,
    ]
    .map(|v| v.unwrap_or(""))
    .join("|");

    format!("{:x}", Sha256::digest(joined.as_bytes()))
}

/// Deterministic embedding input for a mirrored CRM lead.
fn compose_embedding_text(lead: &crm::NewCrmLead) -> String {
    let parts: Vec<&str> = [
        lead.first_name.as_deref(),
        lead.last_name.as_deref(),
        lead.email.as_deref(),
        lead.phone.as_deref(),
        lead.address.as_deref(),
        lead.stage.as_deref(),
        lead.source.as_deref(),
    ]
    .into_iter()
    .flatten()
    .filter(|s| !s.trim().is_empty())
    .collect();

    parts.join(" | ")
}
