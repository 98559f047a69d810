// Schema introspection, validation and upgrade against Postgres

use super::{descriptor_for, upgrade_path, SchemaDescriptor, INFO_TABLE, SUPPORTED_VERSION};
use crate::core::errors::IdentityError;
use sqlx::{FromRow, PgPool};
use tracing::{info, warn};

/// Version reported by the live store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVersion {
    /// No info table: fresh or foreign database
    Unset,
    Version(u32),
}

impl SchemaVersion {
    /// Numeric form; `Unset` is version 0
    pub fn number(self) -> u32 {
        match self {
            SchemaVersion::Unset => 0,
            SchemaVersion::Version(v) => v,
        }
    }
}

#[derive(FromRow)]
struct ColumnRow {
    table_name: String,
    column_name: String,
    data_type: String,
}

/// Structural bootstrap tool for the credential store
pub struct SchemaManager {
    pool: PgPool,
}

impl SchemaManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Read the schema version from the info table
    ///
    /// The info table must carry an integer `schema_ordinal` column; if it does
    /// not, the store is treated as uninitialized.
    pub async fn current_version(&self) -> Result<SchemaVersion, IdentityError> {
        let data_type: Option<String> = sqlx::query_scalar(
            "SELECT data_type::text FROM information_schema.columns
             WHERE table_schema = current_schema()
               AND table_name = $1
               AND column_name = 'schema_ordinal'",
        )
        .bind(INFO_TABLE)
        .fetch_optional(&self.pool)
        .await?;

        if data_type.as_deref() != Some("integer") {
            return Ok(SchemaVersion::Unset);
        }

        let ordinal: Option<i32> =
            sqlx::query_scalar("SELECT schema_ordinal FROM jutzo_database_info LIMIT 1")
                .fetch_optional(&self.pool)
                .await?
                .flatten();

        match ordinal {
            Some(v) if v >= 0 => Ok(SchemaVersion::Version(v as u32)),
            Some(v) => Err(IdentityError::SchemaMismatch(format!(
                "negative schema ordinal {}",
                v
            ))),
            None => Err(IdentityError::SchemaMismatch(
                "database version could not be retrieved".to_string(),
            )),
        }
    }

    /// Describe every `jutzo%` table in the current schema as the store reports it
    pub async fn describe(&self) -> Result<SchemaDescriptor, IdentityError> {
        let rows = sqlx::query_as::<_, ColumnRow>(
            "SELECT table_name::text, column_name::text, data_type::text
             FROM information_schema.columns
             WHERE table_schema = current_schema()
               AND table_name LIKE 'jutzo%'
             ORDER BY table_name, column_name",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut descriptor = SchemaDescriptor::new();
        for row in rows {
            descriptor.add_column(&row.table_name, &row.column_name, &row.data_type);
        }
        Ok(descriptor)
    }

    /// Require the live structure to equal the descriptor for `version`
    pub async fn validate(&self, version: u32) -> Result<(), IdentityError> {
        let expected = descriptor_for(version).ok_or_else(|| {
            IdentityError::SchemaMismatch(format!("schema {} is unknown", version))
        })?;
        let actual = self.describe().await?;

        if actual != expected {
            let differences = actual.diff(&expected);
            warn!(version, differences = ?differences, "Schema validation failed");
            return Err(IdentityError::SchemaMismatch(format!(
                "schema does not match expectations for schema #{}: {}",
                version,
                differences.join("; ")
            )));
        }

        info!(version, "Schema validated");
        Ok(())
    }

    /// Run every upgrade script from `from` forward
    ///
    /// Each statement commits on its own. The first failure aborts the upgrade
    /// and is returned; nothing is rolled back or retried.
    pub async fn upgrade(&self, from: u32) -> Result<u32, IdentityError> {
        info!(from, to = SUPPORTED_VERSION, "Upgrading database schema");

        let mut version = from;
        for statements in upgrade_path(from) {
            for (index, statement) in statements.iter().enumerate() {
                sqlx::raw_sql(statement)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| {
                        IdentityError::SchemaMismatch(format!(
                            "upgrade from version {} failed at statement {}: {}",
                            version, index, e
                        ))
                    })?;
            }
            version += 1;
            info!(version, "Upgraded schema");
        }

        Ok(version)
    }

    /// Bring the store to the supported version and validate it
    ///
    /// Older stores are upgraded; newer or unreadable ones are rejected.
    pub async fn prepare(&self) -> Result<u32, IdentityError> {
        let current = self.current_version().await?.number();

        if current > SUPPORTED_VERSION {
            return Err(IdentityError::SchemaMismatch(format!(
                "store is at schema {}, this build supports up to {}",
                current, SUPPORTED_VERSION
            )));
        }
        if current < SUPPORTED_VERSION {
            self.upgrade(current).await?;
        }

        self.validate(SUPPORTED_VERSION).await?;
        Ok(SUPPORTED_VERSION)
    }
}
