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

//! Outbox store over PostgreSQL.
//!
//! Entries are inserted only through `update_status_with_outbox` on the
//! request store; this module covers the publisher's side of the table.

use async_trait::async_trait;
use diesel::prelude::*;

use crate::database::schema::outbox;
use crate::error::StoreError;
use crate::models::OutboxEntry;
use crate::store::OutboxStore;

use super::models::PgOutboxEntry;
use super::PostgresBackend;

#[async_trait]
impl OutboxStore for PostgresBackend {
    async fn claim_unpublished(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        let conn = self.database.get_connection().await?;
        let limit = limit as i64;

        // SKIP LOCKED keeps concurrent publisher instances off the same
        // batch while a claim transaction is open. Delivery remains
        // at-least-once: a publisher that crashes after the queue send but
        // before mark_published leaves the entry claimable again.
        let rows: Vec<PgOutboxEntry> = conn
            .interact(move |conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    outbox::table
                        .filter(outbox::published.eq(false))
                        .order((outbox::created_at.asc(), outbox::id.asc()))
                        .limit(limit)
                        .for_update()
                        .skip_locked()
                        .load(conn)
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn mark_published(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.database.get_connection().await?;

        let updated = conn
            .interact(move |conn| {
                diesel::update(outbox::table.find(id))
                    .set((
                        outbox::published.eq(true),
                        outbox::published_at.eq(diesel::dsl::now),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "outbox entry",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn record_failure(&self, id: i64, error: &str) -> Result<(), StoreError> {
        let conn = self.database.get_connection().await?;
        let error = error.to_string();

        let updated = conn
            .interact(move |conn| {
                diesel::update(outbox::table.find(id))
                    .set((
                        outbox::retry_count.eq(outbox::retry_count + 1),
                        outbox::last_error.eq(error),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "outbox entry",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn count_unpublished(&self) -> Result<i64, StoreError> {
        let conn = self.database.get_connection().await?;

        let count: i64 = conn
            .interact(|conn| {
                outbox::table
                    .filter(outbox::published.eq(false))
                    .count()
                    .first(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(count)
    }
}
