// Versioned schema descriptors and upgrade scripts

pub mod manager;

pub use manager::SchemaManager;

use std::collections::BTreeMap;
use std::fmt;

/// Schema version this build reads and writes
pub const SUPPORTED_VERSION: u32 = 2;

/// Info table holding the single `schema_ordinal` row
pub const INFO_TABLE: &str = "jutzo_database_info";

const VARCHAR: &str = "character varying";
const TIMESTAMP: &str = "timestamp without time zone";

/// Structural fingerprint of the store: table -> column -> declared type
///
/// Only used for comparison. Two descriptors match only when table set,
/// column set and column types are all identical.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDescriptor {
    tables: BTreeMap<String, BTreeMap<String, String>>,
}

impl SchemaDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column insert
    pub fn with_column(mut self, table: &str, column: &str, data_type: &str) -> Self {
        self.add_column(table, column, data_type);
        self
    }

    pub fn add_column(&mut self, table: &str, column: &str, data_type: &str) {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(column.to_string(), data_type.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn column_type(&self, table: &str, column: &str) -> Option<&str> {
        self.tables.get(table)?.get(column).map(String::as_str)
    }

    /// Human-readable list of every difference against `expected`
    pub fn diff(&self, expected: &SchemaDescriptor) -> Vec<String> {
        let mut differences = Vec::new();

        for (table, columns) in &expected.tables {
            let Some(actual_columns) = self.tables.get(table) else {
                differences.push(format!("missing table {}", table));
                continue;
            };
            for (column, data_type) in columns {
                match actual_columns.get(column) {
                    None => differences.push(format!("missing column {}.{}", table, column)),
                    Some(actual) if actual != data_type => differences.push(format!(
                        "column {}.{} is {}, expected {}",
                        table, column, actual, data_type
                    )),
                    Some(_) => {}
                }
            }
            for column in actual_columns.keys() {
                if !columns.contains_key(column) {
                    differences.push(format!("unexpected column {}.{}", table, column));
                }
            }
        }

        for table in self.tables.keys() {
            if !expected.tables.contains_key(table) {
                differences.push(format!("unexpected table {}", table));
            }
        }

        differences
    }
}

impl fmt::Display for SchemaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (table, columns) in &self.tables {
            writeln!(f, "{}", table)?;
            for (column, data_type) in columns {
                writeln!(f, "  {} {}", column, data_type)?;
            }
        }
        Ok(())
    }
}

/// Expected descriptor for a schema version, if the version is known
pub fn descriptor_for(version: u32) -> Option<SchemaDescriptor> {
    match version {
        1 => Some(version_one()),
        2 => Some(
            version_one().with_column("jutzo_pending_validation", "creation_time", TIMESTAMP),
        ),
        _ => None,
    }
}

fn version_one() -> SchemaDescriptor {
    SchemaDescriptor::new()
        .with_column(INFO_TABLE, "schema_ordinal", "integer")
        .with_column("jutzo_pending_validation", "username", VARCHAR)
        .with_column("jutzo_pending_validation", "uuid", "uuid")
        .with_column("jutzo_registered_user", "creation_time", TIMESTAMP)
        .with_column("jutzo_registered_user", "email", VARCHAR)
        .with_column("jutzo_registered_user", "email_validated", "boolean")
        .with_column("jutzo_registered_user", "password_hash", "bytea")
        .with_column("jutzo_registered_user", "rights", "text")
        .with_column("jutzo_registered_user", "username", VARCHAR)
}

/// Upgrade scripts indexed by source version
///
/// Script `v` moves a store from version `v` to `v + 1`. Script 0 drops and
/// recreates every table, so it is only safe on a fresh store.
pub const UPGRADE_SCRIPTS: &[&[&str]] = &[
    // 0 -> 1
    &[
        "drop table if exists jutzo_database_info cascade",
        "drop table if exists jutzo_pending_validation cascade",
        "drop table if exists jutzo_registered_user cascade",
        "create table if not exists jutzo_registered_user
            (
            username        varchar(256)            not null
                constraint username_key
                primary key,
            email           varchar(256)            not null,
            email_validated boolean   default false not null,
            creation_time   timestamp default now() not null,
            password_hash   bytea                   not null,
            rights          text      default 'blog,login'::text
            )",
        "create table if not exists jutzo_pending_validation
            (
            uuid     uuid default gen_random_uuid() not null
                constraint uuid_key
                primary key,
            username varchar(256)                   not null
                constraint foreign_key_name
                references jutzo_registered_user
                on update cascade on delete cascade
            )",
        "create unique index if not exists email_idx on jutzo_registered_user (email)",
        "create table jutzo_database_info
            (
                schema_ordinal integer default 1
            )",
        "insert into jutzo_database_info (schema_ordinal) values (1)",
    ],
    // 1 -> 2: tickets carry their issue time so they can expire
    &[
        "alter table jutzo_pending_validation
            add column if not exists creation_time timestamp default now() not null",
        "update jutzo_database_info set schema_ordinal = 2",
    ],
];

/// Scripts to run to bring a store at `from` up to the supported version
pub fn upgrade_path(from: u32) -> &'static [&'static [&'static str]] {
    let start = (from as usize).min(UPGRADE_SCRIPTS.len());
    &UPGRADE_SCRIPTS[start..]
}
