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

//! Subscription store over PostgreSQL.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use crate::database::schema::subscriptions;
use crate::error::StoreError;
use crate::models::{NewSubscription, Subscription, SubscriptionStatus};
use crate::store::SubscriptionStore;

use super::models::{NewPgSubscription, PgSubscription};
use super::PostgresBackend;

#[async_trait]
impl SubscriptionStore for PostgresBackend {
    async fn register(&self, new: NewSubscription) -> Result<Subscription, StoreError> {
        if !new.has_single_target() {
            return Err(StoreError::InvalidSubscriptionTarget(
                "exactly one of request_id and topic must be set".to_string(),
            ));
        }
        let conn = self.database.get_connection().await?;

        let headers = serde_json::to_value(&new.headers)
            .map_err(|e| StoreError::Corrupt(format!("bad subscription headers: {}", e)))?;
        let pg_new = NewPgSubscription {
            status: SubscriptionStatus::Active.as_str().to_string(),
            request_id: new.request_id,
            topic: new.topic,
            endpoint_url: new.endpoint_url,
            secret: new.secret,
            headers,
            expires_at: new.expires_at,
        };

        let row: PgSubscription = conn
            .interact(move |conn| {
                diesel::insert_into(subscriptions::table)
                    .values(&pg_new)
                    .get_result(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.try_into()
    }

    async fn find(&self, id: Uuid) -> Result<Option<Subscription>, StoreError> {
        let conn = self.database.get_connection().await?;

        let row: Option<PgSubscription> = conn
            .interact(move |conn| subscriptions::table.find(id).first(conn).optional())
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.map(TryInto::try_into).transpose()
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let conn = self.database.get_connection().await?;

        let deleted = conn
            .interact(move |conn| diesel::delete(subscriptions::table.find(id)).execute(conn))
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(deleted > 0)
    }

    async fn list_active_for_request(
        &self,
        request_id: Uuid,
    ) -> Result<Vec<Subscription>, StoreError> {
        let conn = self.database.get_connection().await?;
        let now = Utc::now();

        let rows: Vec<PgSubscription> = conn
            .interact(move |conn| {
                subscriptions::table
                    .filter(subscriptions::request_id.eq(request_id))
                    .filter(subscriptions::status.eq(SubscriptionStatus::Active.as_str()))
                    .filter(
                        subscriptions::expires_at
                            .is_null()
                            .or(subscriptions::expires_at.gt(now)),
                    )
                    .load(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_active_for_topic(&self, topic: &str) -> Result<Vec<Subscription>, StoreError> {
        let conn = self.database.get_connection().await?;
        let topic = topic.to_string();
        let now = Utc::now();

        let rows: Vec<PgSubscription> = conn
            .interact(move |conn| {
                subscriptions::table
                    .filter(subscriptions::topic.eq(topic))
                    .filter(subscriptions::status.eq(SubscriptionStatus::Active.as_str()))
                    .filter(
                        subscriptions::expires_at
                            .is_null()
                            .or(subscriptions::expires_at.gt(now)),
                    )
                    .load(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn record_delivery_failure(&self, id: Uuid) -> Result<i32, StoreError> {
        let conn = self.database.get_connection().await?;

        let row: Option<PgSubscription> = conn
            .interact(move |conn| {
                diesel::update(subscriptions::table.find(id))
                    .set(subscriptions::failure_count.eq(subscriptions::failure_count + 1))
                    .get_result(conn)
                    .optional()
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        let row = row.ok_or_else(|| StoreError::NotFound {
            entity: "subscription",
            id: id.to_string(),
        })?;
        Ok(row.failure_count)
    }

    async fn disable(&self, id: Uuid) -> Result<(), StoreError> {
        let conn = self.database.get_connection().await?;

        let updated = conn
            .interact(move |conn| {
                diesel::update(subscriptions::table.find(id))
                    .set(subscriptions::status.eq(SubscriptionStatus::Error.as_str()))
                    .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "subscription",
                id: id.to_string(),
            });
        }
        Ok(())
    }
}
