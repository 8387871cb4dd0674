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

//! Diesel schema definitions; must stay in sync with `migrations/`.

diesel::table! {
    requests (id) {
        id -> Uuid,
        tenant -> Text,
        correlation_id -> Text,
        idempotency_key -> Nullable<Text>,
        external_ref -> Nullable<Text>,
        status -> Text,
        last_stage -> Nullable<Text>,
        next_stage -> Nullable<Text>,
        resolved_sync -> Bool,
        queued_async -> Bool,
        payload_bucket -> Text,
        payload_key -> Text,
        result_bucket -> Nullable<Text>,
        result_key -> Nullable<Text>,
        patient_ref -> Nullable<Text>,
        provider_ref -> Nullable<Text>,
        service_date -> Nullable<Timestamptz>,
        related_request_id -> Nullable<Uuid>,
        error_code -> Nullable<Text>,
        error_message -> Nullable<Text>,
        retry_count -> Int4,
        received_at -> Timestamptz,
        updated_at -> Timestamptz,
        completed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    outbox (id) {
        id -> Int8,
        destination -> Text,
        message_key -> Text,
        body -> Text,
        published -> Bool,
        published_at -> Nullable<Timestamptz>,
        retry_count -> Int4,
        last_error -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    subscriptions (id) {
        id -> Uuid,
        status -> Text,
        request_id -> Nullable<Uuid>,
        topic -> Nullable<Text>,
        endpoint_url -> Text,
        secret -> Nullable<Text>,
        headers -> Jsonb,
        expires_at -> Nullable<Timestamptz>,
        failure_count -> Int4,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    idempotency_keys (tenant, key) {
        tenant -> Text,
        key -> Text,
        request_id -> Uuid,
        fingerprint -> Nullable<Text>,
        outcome -> Nullable<Text>,
        expires_at -> Timestamptz,
        created_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(requests, outbox, subscriptions, idempotency_keys);
