//! PostgreSQL store.
//!
//! Rows of described columns are addressed by `ctid` unless the descriptor
//! names a key column. Table and column names come from configuration and
//! descriptor files, so every identifier is quoted before it reaches SQL.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row};

use super::{MigrationStore, StoreError, StoreTransaction, TableNames};
use crate::model::{
    ColumnDescriptor, ColumnKind, ColumnRow, ColumnValue, IdentityMapping, LegacyUserRecord,
    MigratedUser, RowLocator, TargetUser, TenantMembership,
};

/// Default pool size. The engine is sequential; one connection does the work.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 2;

/// Quote an identifier, allowing a schema-qualified `schema.table` form.
pub fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

fn mapping_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            legacy_id TEXT PRIMARY KEY,
            email TEXT NOT NULL,
            new_id TEXT NOT NULL,
            migrated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
        quote_ident(table)
    )
}

fn mapping_index_sql(table: &str) -> String {
    let base = table.rsplit('.').next().unwrap_or(table);
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} (email)",
        quote_ident(&format!("{}_email_idx", base)),
        quote_ident(table)
    )
}

fn locator_expr(column: &ColumnDescriptor) -> String {
    match &column.key {
        Some(key) => format!("{}::text", quote_ident(key)),
        None => "ctid::text".to_string(),
    }
}

fn scan_sql(column: &ColumnDescriptor) -> String {
    let cast = match column.kind {
        ColumnKind::Scalar => "text",
        ColumnKind::Array => "text[]",
    };
    format!(
        "SELECT {} AS locator, {}::{} AS value FROM {}",
        locator_expr(column),
        quote_ident(&column.column),
        cast,
        quote_ident(&column.table)
    )
}

/// Declared type of a table column, as Postgres spells it.
const COLUMN_TYPE_SQL: &str = "SELECT format_type(a.atttypid, a.atttypmod)
     FROM pg_attribute a
     WHERE a.attrelid = $1::regclass AND a.attname = $2
       AND a.attnum > 0 AND NOT a.attisdropped";

/// `key_type` is the key column's declared type. The locator is cast to it so
/// the comparison can use the key's index.
fn update_sql(column: &ColumnDescriptor, key_type: Option<&str>) -> String {
    let predicate = match &column.key {
        Some(key) => format!(
            "{} = $2::text::{}",
            quote_ident(key),
            key_type.unwrap_or("text")
        ),
        None => "ctid = $2::tid".to_string(),
    };
    format!(
        "UPDATE {} SET {} = $1 WHERE {}",
        quote_ident(&column.table),
        quote_ident(&column.column),
        predicate
    )
}

fn mapping_from_row(row: &PgRow) -> Result<IdentityMapping, sqlx::Error> {
    Ok(IdentityMapping {
        legacy_id: row.try_get("legacy_id")?,
        email: row.try_get("email")?,
        new_id: row.try_get("new_id")?,
        migrated_at: row.try_get::<DateTime<Utc>, _>("migrated_at")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn legacy_user_from_row(row: &PgRow) -> Result<LegacyUserRecord, sqlx::Error> {
    Ok(LegacyUserRecord {
        legacy_id: row.try_get("id")?,
        profile: row.try_get::<Option<serde_json::Value>, _>("profile")?,
        email: row
            .try_get::<Option<String>, _>("email")?
            .unwrap_or_default(),
        tenant_id: row.try_get("tenant_id")?,
        roles: row
            .try_get::<Option<Vec<String>>, _>("roles")?
            .unwrap_or_default(),
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

/// Store backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    tables: TableNames,
    /// Declared key column types, keyed by (table, column).
    key_types: Arc<Mutex<HashMap<(String, String), String>>>,
}

impl PgStore {
    /// Connect to `database_url`.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        tables: TableNames,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await?;
        Ok(Self::new(pool, tables))
    }

    /// Wrap an existing pool.
    pub fn new(pool: PgPool, tables: TableNames) -> Self {
        Self {
            pool,
            tables,
            key_types: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    async fn key_type(&self, table: &str, key: &str) -> Result<String, StoreError> {
        let cache_key = (table.to_string(), key.to_string());
        let cached = self.key_types.lock().get(&cache_key).cloned();
        if let Some(key_type) = cached {
            return Ok(key_type);
        }

        let declared: Option<String> = sqlx::query_scalar(COLUMN_TYPE_SQL)
            .bind(quote_ident(table))
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        let declared = declared.ok_or_else(|| StoreError::UnknownColumn {
            table: table.to_string(),
            column: key.to_string(),
        })?;
        tracing::debug!(table, key, key_type = %declared, "resolved key column type");
        self.key_types.lock().insert(cache_key, declared.clone());
        Ok(declared)
    }

    fn legacy_select(&self) -> String {
        format!(
            "SELECT id, profile, email, tenant_id, roles, created_at FROM {}",
            quote_ident(&self.tables.legacy_users)
        )
    }
}

#[async_trait]
impl MigrationStore for PgStore {
    async fn ensure_mapping_table(&self) -> Result<(), StoreError> {
        sqlx::query(&mapping_table_sql(&self.tables.mappings))
            .execute(&self.pool)
            .await?;
        sqlx::query(&mapping_index_sql(&self.tables.mappings))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction {
            tx,
            tables: self.tables.clone(),
        }))
    }

    async fn find_mapping(&self, identifier: &str) -> Result<Option<IdentityMapping>, StoreError> {
        let sql = format!(
            "SELECT legacy_id, email, new_id, migrated_at, created_at FROM {}
             WHERE legacy_id = $1 OR email = $1
             ORDER BY migrated_at DESC LIMIT 1",
            quote_ident(&self.tables.mappings)
        );
        let row = sqlx::query(&sql)
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(mapping_from_row).transpose()?)
    }

    async fn list_mappings(&self) -> Result<Vec<IdentityMapping>, StoreError> {
        let sql = format!(
            "SELECT legacy_id, email, new_id, migrated_at, created_at FROM {}
             ORDER BY migrated_at DESC, legacy_id ASC",
            quote_ident(&self.tables.mappings)
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(mapping_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn list_legacy_users(&self) -> Result<Vec<LegacyUserRecord>, StoreError> {
        let sql = format!("{} ORDER BY created_at ASC, id ASC", self.legacy_select());
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(legacy_user_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn get_legacy_user(
        &self,
        legacy_id: &str,
    ) -> Result<Option<LegacyUserRecord>, StoreError> {
        let sql = format!("{} WHERE id = $1", self.legacy_select());
        let row = sqlx::query(&sql)
            .bind(legacy_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(legacy_user_from_row).transpose()?)
    }

    async fn list_migrated_users(&self) -> Result<Vec<MigratedUser>, StoreError> {
        let sql = format!(
            "SELECT u.id AS legacy_id, m.new_id, u.tenant_id
             FROM {} u JOIN {} m ON m.legacy_id = u.id
             ORDER BY u.id ASC",
            quote_ident(&self.tables.legacy_users),
            quote_ident(&self.tables.mappings)
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| -> Result<MigratedUser, StoreError> {
                Ok(MigratedUser {
                    legacy_id: row.try_get("legacy_id")?,
                    new_id: row.try_get("new_id")?,
                    tenant_id: row.try_get("tenant_id")?,
                })
            })
            .collect()
    }

    async fn scan_column(&self, column: &ColumnDescriptor) -> Result<Vec<ColumnRow>, StoreError> {
        let sql = scan_sql(column);
        // fetch_all buffers the whole result before any update is issued
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| -> Result<ColumnRow, StoreError> {
                let locator = row
                    .try_get::<Option<String>, _>("locator")?
                    .ok_or_else(|| {
                        StoreError::InvalidData(format!(
                            "row of {} has a null locator",
                            column.table
                        ))
                    })?;
                let value = match column.kind {
                    ColumnKind::Scalar => {
                        ColumnValue::Scalar(row.try_get::<Option<String>, _>("value")?)
                    }
                    ColumnKind::Array => ColumnValue::Array(
                        row.try_get::<Option<Vec<Option<String>>>, _>("value")?,
                    ),
                };
                Ok(ColumnRow {
                    locator: RowLocator(locator),
                    value,
                })
            })
            .collect()
    }

    async fn update_column(
        &self,
        column: &ColumnDescriptor,
        locator: &RowLocator,
        value: &ColumnValue,
    ) -> Result<(), StoreError> {
        let key_type = match &column.key {
            Some(key) => Some(self.key_type(&column.table, key).await?),
            None => None,
        };
        let sql = update_sql(column, key_type.as_deref());
        let query = match value {
            ColumnValue::Scalar(v) => sqlx::query(&sql).bind(v.clone()),
            ColumnValue::Array(v) => sqlx::query(&sql).bind(v.clone()),
        };
        let result = query.bind(&locator.0).execute(&self.pool).await?;

        // ctid moves when the live service updates the row between scan and write
        if result.rows_affected() == 0 {
            return Err(StoreError::InvalidData(format!(
                "no row at {} in {}",
                locator, column.table
            )));
        }
        Ok(())
    }
}

/// One per-user PostgreSQL transaction.
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    tables: TableNames,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn upsert_mapping(
        &mut self,
        legacy_id: &str,
        email: &str,
        new_id: &str,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} (legacy_id, email, new_id) VALUES ($1, $2, $3)
             ON CONFLICT (legacy_id)
             DO UPDATE SET email = EXCLUDED.email, new_id = EXCLUDED.new_id",
            quote_ident(&self.tables.mappings)
        );
        sqlx::query(&sql)
            .bind(legacy_id)
            .bind(email)
            .bind(new_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn target_user_exists(&mut self, id: &str) -> Result<bool, StoreError> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE id = $1)",
            quote_ident(&self.tables.target_users)
        );
        let exists: bool = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(exists)
    }

    async fn create_target_user(&mut self, user: &TargetUser) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} (id, email, profile) VALUES ($1, $2, $3)",
            quote_ident(&self.tables.target_users)
        );
        sqlx::query(&sql)
            .bind(&user.id)
            .bind(&user.email)
            .bind(&user.profile)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn membership_exists(
        &mut self,
        user_id: &str,
        tenant_id: &str,
    ) -> Result<bool, StoreError> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE user_id = $1 AND tenant_id = $2)",
            quote_ident(&self.tables.memberships)
        );
        let exists: bool = sqlx::query_scalar(&sql)
            .bind(user_id)
            .bind(tenant_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(exists)
    }

    async fn create_membership(&mut self, membership: &TenantMembership) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} (user_id, tenant_id, roles, invited_by, invited_at, status)
             VALUES ($1, $2, $3, $4, $5, $6)",
            quote_ident(&self.tables.memberships)
        );
        sqlx::query(&sql)
            .bind(&membership.user_id)
            .bind(&membership.tenant_id)
            .bind(&membership.roles)
            .bind(&membership.invited_by)
            .bind(membership.invited_at)
            .bind(membership.status.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("public.users"), "\"public\".\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_scan_sql_physical_locator() {
        let sql = scan_sql(&ColumnDescriptor::scalar("documents", "owner_id"));
        assert_eq!(
            sql,
            "SELECT ctid::text AS locator, \"owner_id\"::text AS value FROM \"documents\""
        );
    }

    #[test]
    fn test_scan_sql_array_with_key() {
        let sql = scan_sql(&ColumnDescriptor::array("projects", "member_ids").with_key("id"));
        assert_eq!(
            sql,
            "SELECT \"id\"::text AS locator, \"member_ids\"::text[] AS value FROM \"projects\""
        );
    }

    #[test]
    fn test_update_sql() {
        assert_eq!(
            update_sql(&ColumnDescriptor::scalar("documents", "owner_id"), None),
            "UPDATE \"documents\" SET \"owner_id\" = $1 WHERE ctid = $2::tid"
        );
    }

    #[test]
    fn test_update_sql_keeps_key_column_uncast() {
        let descriptor = ColumnDescriptor::scalar("documents", "owner_id").with_key("id");
        assert_eq!(
            update_sql(&descriptor, Some("bigint")),
            "UPDATE \"documents\" SET \"owner_id\" = $1 WHERE \"id\" = $2::text::bigint"
        );
        assert_eq!(
            update_sql(&descriptor, Some("character varying(36)")),
            "UPDATE \"documents\" SET \"owner_id\" = $1 WHERE \"id\" = $2::text::character varying(36)"
        );
    }

    #[test]
    fn test_mapping_ddl() {
        let ddl = mapping_table_sql("user_id_mappings");
        assert!(ddl.contains("CREATE TABLE IF NOT EXISTS \"user_id_mappings\""));
        assert!(ddl.contains("legacy_id TEXT PRIMARY KEY"));
        assert_eq!(
            mapping_index_sql("auth.user_id_mappings"),
            "CREATE INDEX IF NOT EXISTS \"user_id_mappings_email_idx\" ON \"auth\".\"user_id_mappings\" (email)"
        );
    }
}
