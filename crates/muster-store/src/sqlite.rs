// Copyright (C) 2026 Muster Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed document store.
//!
//! Documents are JSON text rows in a single `(collection, id, doc)` table.
//! Each `apply` runs inside one SQL transaction on a single-connection
//! pool, so assertion checks and mutations are atomic and linearized
//! against every other op set.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::StoreError;
use crate::ops::{Mutate, Op};
use crate::store::DocumentStore;

/// SQLite-backed [`DocumentStore`] implementation.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create and initialize a store backed by a database file.
    ///
    /// Creates parent directories and the database file if needed, then
    /// ensures the schema exists.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        Self::connect(&url).await
    }

    /// Create and initialize a transient in-memory store.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:").await
    }

    /// Create and initialize a store from a SQLite connection URL, as
    /// carried by configuration (`sqlite:path?mode=rwc`, `sqlite::memory:`).
    pub async fn from_url(url: &str) -> Result<Self, StoreError> {
        Self::connect(url).await
    }

    async fn connect(url: &str) -> Result<Self, StoreError> {
        // One connection: transactions on it serialize all op sets, which
        // is what makes assert-then-mutate linearizable.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .map_err(|e| StoreError::Backend {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {}: {}", url, e),
            })?;

        ensure_schema(&pool).await?;
        Ok(SqliteStore { pool })
    }
}

async fn ensure_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            doc TEXT NOT NULL,
            PRIMARY KEY (collection, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sequences (
            name TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

fn parse_doc(text: &str) -> Result<Value, StoreError> {
    serde_json::from_str(text).map_err(StoreError::from)
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn apply(&self, ops: &[Op]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for op in ops {
            let current: Option<String> = sqlx::query_scalar(
                "SELECT doc FROM documents WHERE collection = ? AND id = ?",
            )
            .bind(op.collection)
            .bind(&op.id)
            .fetch_optional(&mut *tx)
            .await?;

            let current = current.as_deref().map(parse_doc).transpose()?;
            if !op.assert.holds(current.as_ref()) {
                return Err(StoreError::Rejected);
            }

            match &op.mutate {
                Mutate::Insert(doc) => {
                    if current.is_some() {
                        return Err(StoreError::Rejected);
                    }
                    sqlx::query("INSERT INTO documents (collection, id, doc) VALUES (?, ?, ?)")
                        .bind(op.collection)
                        .bind(&op.id)
                        .bind(serde_json::to_string(doc)?)
                        .execute(&mut *tx)
                        .await?;
                }
                Mutate::Update(fields) => {
                    let Some(Value::Object(mut obj)) = current else {
                        return Err(StoreError::Rejected);
                    };
                    for (name, value) in fields {
                        obj.insert(name.clone(), value.clone());
                    }
                    sqlx::query("UPDATE documents SET doc = ? WHERE collection = ? AND id = ?")
                        .bind(serde_json::to_string(&Value::Object(obj))?)
                        .bind(op.collection)
                        .bind(&op.id)
                        .execute(&mut *tx)
                        .await?;
                }
                Mutate::Remove => {
                    if current.is_none() {
                        return Err(StoreError::Rejected);
                    }
                    sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
                        .bind(op.collection)
                        .bind(&op.id)
                        .execute(&mut *tx)
                        .await?;
                }
                Mutate::None => {}
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let doc: Option<String> =
            sqlx::query_scalar("SELECT doc FROM documents WHERE collection = ? AND id = ?")
                .bind(collection)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        doc.as_deref().map(parse_doc).transpose()
    }

    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        // Collections here are small; filter client-side on the parsed doc.
        let mut out = Vec::new();
        for (id, doc) in self.list(collection).await? {
            if doc.get(field) == Some(value) {
                out.push((id, doc));
            }
        }
        Ok(out)
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT id, doc FROM documents WHERE collection = ? ORDER BY id",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, text)| Ok((id, parse_doc(&text)?)))
            .collect()
    }

    async fn next_sequence(&self, name: &str) -> Result<i64, StoreError> {
        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sequences (name, value) VALUES (?, 1)
            ON CONFLICT (name) DO UPDATE SET value = value + 1
            RETURNING value
            "#,
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(value)
    }
}
