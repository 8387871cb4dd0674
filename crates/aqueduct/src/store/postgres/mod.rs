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

//! PostgreSQL storage backend.
//!
//! All trait implementations go through `deadpool-diesel`'s `interact` to
//! run blocking diesel queries off the async runtime. Completion flags are
//! conditional updates (claim succeeds iff exactly one row changed), and
//! `update_status_with_outbox` wraps the transition and the outbox insert in
//! one database transaction.

mod idempotency;
mod models;
mod outbox;
mod request;
mod subscription;

use crate::database::Database;

/// Backend implementing the request, outbox, and subscription stores over
/// one shared connection pool.
#[derive(Clone, Debug)]
pub struct PostgresBackend {
    pub(crate) database: Database,
}

impl PostgresBackend {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

/// Idempotency gate backed by the `idempotency_keys` table.
#[derive(Clone, Debug)]
pub struct PostgresIdempotencyStore {
    pub(crate) database: Database,
}

impl PostgresIdempotencyStore {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}
