/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Request store over PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::database::schema::{outbox, requests};
use crate::error::StoreError;
use crate::models::{BlobPointer, NewOutboxEntry, NewRequestRecord, OutboxEntry, RequestRecord};
use crate::state::{PipelineStage, RequestStatus};
use crate::store::{RequestStore, StatusUpdate};

use super::models::{NewPgOutboxEntry, NewPgRequest, PgOutboxEntry, PgRequest};
use super::PostgresBackend;

/// Locks the row and applies one lifecycle transition. Must run inside a
/// transaction so the lock covers any further writes by the caller.
fn apply_transition(
    conn: &mut PgConnection,
    id: Uuid,
    update: &StatusUpdate,
) -> Result<PgRequest, StoreError> {
    let row: PgRequest = requests::table
        .find(id)
        .for_update()
        .first(conn)
        .optional()?
        .ok_or_else(|| StoreError::NotFound {
            entity: "request",
            id: id.to_string(),
        })?;

    let current = RequestStatus::parse(&row.status)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown status '{}'", row.status)))?;

    let last_stage = update.last_stage.map(|s| s.as_str().to_string());
    let next_stage = update.next_stage.map(|s| s.as_str().to_string());

    // Re-applying the exact transition a crashed worker already applied is
    // legal and a no-op.
    let identical = current == update.status
        && row.last_stage == last_stage
        && row.next_stage == next_stage
        && row.error_code == update.error_code
        && row.error_message == update.error_message;
    if identical {
        return Ok(row);
    }

    if !current.can_transition_to(update.status) {
        return Err(StoreError::InvalidTransition {
            id,
            from: current,
            to: update.status,
        });
    }

    let now = Utc::now();
    let completed_at: Option<DateTime<Utc>> = if update.status.is_terminal() {
        row.completed_at.or(Some(now))
    } else {
        row.completed_at
    };

    let refreshed = diesel::update(requests::table.find(id))
        .set((
            requests::status.eq(update.status.as_str()),
            requests::last_stage.eq(last_stage),
            requests::next_stage.eq(next_stage),
            requests::error_code.eq(update.error_code.clone()),
            requests::error_message.eq(update.error_message.clone()),
            requests::updated_at.eq(now),
            requests::completed_at.eq(completed_at),
        ))
        .get_result(conn)?;

    Ok(refreshed)
}

/// Sets one completion flag iff neither flag is set yet. Returns whether
/// this call won the claim.
async fn try_claim_flag(
    backend: &PostgresBackend,
    id: Uuid,
    resolved_sync: bool,
) -> Result<bool, StoreError> {
    let conn = backend.database.get_connection().await?;

    let updated: usize = conn
        .interact(move |conn| {
            let target = diesel::update(requests::table.find(id))
                .filter(requests::resolved_sync.eq(false))
                .filter(requests::queued_async.eq(false));
            if resolved_sync {
                target
                    .set((
                        requests::resolved_sync.eq(true),
                        requests::updated_at.eq(diesel::dsl::now),
                    ))
                    .execute(conn)
            } else {
                target
                    .set((
                        requests::queued_async.eq(true),
                        requests::updated_at.eq(diesel::dsl::now),
                    ))
                    .execute(conn)
            }
        })
        .await
        .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

    if updated == 1 {
        return Ok(true);
    }

    // Zero rows means either a lost race or a missing record; tell them apart.
    let exists: i64 = conn
        .interact(move |conn| requests::table.find(id).count().first(conn))
        .await
        .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;
    if exists == 0 {
        return Err(StoreError::NotFound {
            entity: "request",
            id: id.to_string(),
        });
    }
    Ok(false)
}

#[async_trait]
impl RequestStore for PostgresBackend {
    async fn create(&self, new: NewRequestRecord) -> Result<RequestRecord, StoreError> {
        let conn = self.database.get_connection().await?;

        let pg_new = NewPgRequest {
            id: new.id,
            tenant: new.tenant,
            correlation_id: new.correlation_id,
            idempotency_key: new.idempotency_key,
            status: RequestStatus::Received.as_str().to_string(),
            last_stage: Some(PipelineStage::Intake.as_str().to_string()),
            next_stage: Some(PipelineStage::Parse.as_str().to_string()),
            payload_bucket: new.payload.bucket,
            payload_key: new.payload.key,
            patient_ref: new.patient_ref,
            provider_ref: new.provider_ref,
            service_date: new.service_date,
            related_request_id: new.related_request_id,
        };
        let id = pg_new.id;

        let row: PgRequest = conn
            .interact(move |conn| {
                diesel::insert_into(requests::table)
                    .values(&pg_new)
                    .get_result(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| match e {
                diesel::result::Error::DatabaseError(
                    diesel::result::DatabaseErrorKind::UniqueViolation,
                    _,
                ) => StoreError::DuplicateRequest(id),
                other => StoreError::Database(other),
            })?;

        row.try_into()
    }

    async fn get(&self, id: Uuid) -> Result<Option<RequestRecord>, StoreError> {
        let conn = self.database.get_connection().await?;

        let row: Option<PgRequest> = conn
            .interact(move |conn| requests::table.find(id).first(conn).optional())
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.map(TryInto::try_into).transpose()
    }

    async fn find_by_external_ref(
        &self,
        tenant: &str,
        external_ref: &str,
    ) -> Result<Option<RequestRecord>, StoreError> {
        let conn = self.database.get_connection().await?;
        let tenant = tenant.to_string();
        let external_ref = external_ref.to_string();

        let row: Option<PgRequest> = conn
            .interact(move |conn| {
                requests::table
                    .filter(requests::tenant.eq(tenant))
                    .filter(requests::external_ref.eq(external_ref))
                    .first(conn)
                    .optional()
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.map(TryInto::try_into).transpose()
    }

    async fn find_by_correlation_id(
        &self,
        tenant: &str,
        correlation_id: &str,
    ) -> Result<Option<RequestRecord>, StoreError> {
        let conn = self.database.get_connection().await?;
        let tenant = tenant.to_string();
        let correlation_id = correlation_id.to_string();

        let row: Option<PgRequest> = conn
            .interact(move |conn| {
                requests::table
                    .filter(requests::tenant.eq(tenant))
                    .filter(requests::correlation_id.eq(correlation_id))
                    .order(requests::received_at.desc())
                    .first(conn)
                    .optional()
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.map(TryInto::try_into).transpose()
    }

    async fn find_by_idempotency_key(
        &self,
        tenant: &str,
        key: &str,
    ) -> Result<Option<RequestRecord>, StoreError> {
        let conn = self.database.get_connection().await?;
        let tenant = tenant.to_string();
        let key = key.to_string();

        let row: Option<PgRequest> = conn
            .interact(move |conn| {
                requests::table
                    .filter(requests::tenant.eq(tenant))
                    .filter(requests::idempotency_key.eq(key))
                    .first(conn)
                    .optional()
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.map(TryInto::try_into).transpose()
    }

    async fn find_by_patient_provider_date_range(
        &self,
        tenant: &str,
        patient_ref: &str,
        provider_ref: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RequestRecord>, StoreError> {
        let conn = self.database.get_connection().await?;
        let tenant = tenant.to_string();
        let patient_ref = patient_ref.to_string();
        let provider_ref = provider_ref.to_string();

        let rows: Vec<PgRequest> = conn
            .interact(move |conn| {
                requests::table
                    .filter(requests::tenant.eq(tenant))
                    .filter(requests::patient_ref.eq(patient_ref))
                    .filter(requests::provider_ref.eq(provider_ref))
                    .filter(requests::service_date.ge(from))
                    .filter(requests::service_date.le(to))
                    .order(requests::received_at.desc())
                    .load(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn update_status(
        &self,
        id: Uuid,
        update: StatusUpdate,
    ) -> Result<RequestRecord, StoreError> {
        let conn = self.database.get_connection().await?;

        let row: PgRequest = conn
            .interact(move |conn| {
                conn.transaction::<_, StoreError, _>(|conn| apply_transition(conn, id, &update))
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.try_into()
    }

    async fn set_external_ref(&self, id: Uuid, external_ref: &str) -> Result<(), StoreError> {
        let conn = self.database.get_connection().await?;
        let external_ref = external_ref.to_string();

        let updated = conn
            .interact(move |conn| {
                diesel::update(requests::table.find(id))
                    .set((
                        requests::external_ref.eq(external_ref),
                        requests::updated_at.eq(diesel::dsl::now),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "request",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn set_result(&self, id: Uuid, result: BlobPointer) -> Result<(), StoreError> {
        let conn = self.database.get_connection().await?;

        let updated = conn
            .interact(move |conn| {
                diesel::update(requests::table.find(id))
                    .set((
                        requests::result_bucket.eq(result.bucket),
                        requests::result_key.eq(result.key),
                        requests::updated_at.eq(diesel::dsl::now),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "request",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn try_mark_resolved_sync(&self, id: Uuid) -> Result<bool, StoreError> {
        try_claim_flag(self, id, true).await
    }

    async fn try_mark_queued_async(&self, id: Uuid) -> Result<bool, StoreError> {
        try_claim_flag(self, id, false).await
    }

    async fn update_status_with_outbox(
        &self,
        id: Uuid,
        update: StatusUpdate,
        outbox_entry: NewOutboxEntry,
    ) -> Result<OutboxEntry, StoreError> {
        let conn = self.database.get_connection().await?;

        let pg_new = NewPgOutboxEntry {
            destination: outbox_entry.destination,
            message_key: outbox_entry.message_key,
            body: outbox_entry.body,
        };

        let row: PgOutboxEntry = conn
            .interact(move |conn| {
                conn.transaction::<_, StoreError, _>(|conn| {
                    apply_transition(conn, id, &update)?;
                    let entry = diesel::insert_into(outbox::table)
                        .values(&pg_new)
                        .get_result(conn)?;
                    Ok(entry)
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(row.into())
    }
}
