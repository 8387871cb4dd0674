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

//! Idempotency gate over PostgreSQL.
//!
//! The (tenant, key) primary key makes the reservation race-safe: of two
//! concurrent submissions with the same key, exactly one insert wins and
//! the other observes the winner's entry. Expired entries are reclaimed in
//! place under a row lock.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use std::time::Duration;
use uuid::Uuid;

use crate::database::schema::idempotency_keys;
use crate::error::StoreError;
use crate::models::IdempotencyEntry;
use crate::store::IdempotencyStore;

use super::models::PgIdempotencyEntry;
use super::PostgresIdempotencyStore;

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    async fn check_and_set(
        &self,
        tenant: &str,
        key: &str,
        request_id: Uuid,
        ttl: Duration,
    ) -> Result<Option<IdempotencyEntry>, StoreError> {
        let conn = self.database.get_connection().await?;
        let tenant = tenant.to_string();
        let key = key.to_string();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StoreError::Corrupt(format!("idempotency TTL out of range: {}", e)))?;

        let existing: Option<PgIdempotencyEntry> = conn
            .interact(move |conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    let now = Utc::now();
                    let new_row = PgIdempotencyEntry {
                        tenant: tenant.clone(),
                        key: key.clone(),
                        request_id,
                        fingerprint: None,
                        outcome: None,
                        expires_at: now + ttl,
                        created_at: now,
                    };

                    let inserted = diesel::insert_into(idempotency_keys::table)
                        .values(&new_row)
                        .on_conflict((idempotency_keys::tenant, idempotency_keys::key))
                        .do_nothing()
                        .execute(conn)?;
                    if inserted == 1 {
                        return Ok(None);
                    }

                    let current: PgIdempotencyEntry = idempotency_keys::table
                        .find((tenant.clone(), key.clone()))
                        .for_update()
                        .first(conn)?;
                    if current.expires_at > now {
                        return Ok(Some(current));
                    }

                    // Expired entry: reclaim the slot for this submission.
                    diesel::update(idempotency_keys::table.find((tenant, key)))
                        .set((
                            idempotency_keys::request_id.eq(request_id),
                            idempotency_keys::fingerprint.eq(None::<String>),
                            idempotency_keys::outcome.eq(None::<String>),
                            idempotency_keys::expires_at.eq(now + ttl),
                            idempotency_keys::created_at.eq(now),
                        ))
                        .execute(conn)?;
                    Ok(None)
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(existing.map(Into::into))
    }

    async fn commit(
        &self,
        tenant: &str,
        key: &str,
        fingerprint: &str,
        outcome: &str,
    ) -> Result<(), StoreError> {
        let conn = self.database.get_connection().await?;
        let tenant = tenant.to_string();
        let key = key.to_string();
        let fingerprint = fingerprint.to_string();
        let outcome = outcome.to_string();

        conn.interact(move |conn| {
            diesel::update(idempotency_keys::table.find((tenant, key)))
                .set((
                    idempotency_keys::fingerprint.eq(fingerprint),
                    idempotency_keys::outcome.eq(outcome),
                ))
                .execute(conn)
        })
        .await
        .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(())
    }

    async fn remove(&self, tenant: &str, key: &str) -> Result<(), StoreError> {
        let conn = self.database.get_connection().await?;
        let tenant = tenant.to_string();
        let key = key.to_string();

        conn.interact(move |conn| {
            diesel::delete(idempotency_keys::table.find((tenant, key))).execute(conn)
        })
        .await
        .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(())
    }
}
