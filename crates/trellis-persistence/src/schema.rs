//! Embedded schema assets and prepared statements
//!
//! DDL fragments are compiled into the binary and applied idempotently
//! (`CREATE ... IF NOT EXISTS`) when a directory initializes. Applied objects
//! are recorded in the session's schema catalog, which statement preparation
//! consults.

use trellis_common::{TrellisError, new_etag};

pub const MEMBERSHIP_TABLE: &str = "membership";
pub const REMINDERS_TABLE: &str = "reminders";
pub const REMINDERS_HASH_INDEX: &str = "reminders_hash_idx";

/// Tables and indexes a storage engine must be able to back
pub const KNOWN_STORES: &[&str] = &[MEMBERSHIP_TABLE, REMINDERS_TABLE, REMINDERS_HASH_INDEX];

/// Composite types and membership table, in dependency order
pub const MEMBERSHIP_SCHEMA: [SchemaAsset; 3] = [
    SchemaAsset {
        name: "1_suspect_time.cql",
        ddl: include_str!("../schema/membership/1_suspect_time.cql"),
    },
    SchemaAsset {
        name: "2_silo.cql",
        ddl: include_str!("../schema/membership/2_silo.cql"),
    },
    SchemaAsset {
        name: "3_membership.cql",
        ddl: include_str!("../schema/membership/3_membership.cql"),
    },
];

/// Reminders table and its secondary index on `hash`
pub const REMINDERS_SCHEMA: [SchemaAsset; 2] = [
    SchemaAsset {
        name: "1_reminders.cql",
        ddl: include_str!("../schema/reminders/1_reminders.cql"),
    },
    SchemaAsset {
        name: "2_reminders_hash_index.cql",
        ddl: include_str!("../schema/reminders/2_reminders_hash_index.cql"),
    },
];

/// Kind of object created by a DDL fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaObjectKind {
    Type,
    Table,
    Index,
}

/// Object declared by a schema asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaObject {
    pub kind: SchemaObjectKind,
    pub name: String,
}

impl SchemaObject {
    /// Whether the engine needs physical storage for this object
    pub fn needs_store(&self) -> bool {
        matches!(self.kind, SchemaObjectKind::Table | SchemaObjectKind::Index)
    }
}

/// A static DDL fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaAsset {
    pub name: &'static str,
    pub ddl: &'static str,
}

impl SchemaAsset {
    /// Parse the object declared by this fragment
    ///
    /// Only `CREATE TYPE|TABLE|INDEX IF NOT EXISTS <name>` is accepted, so
    /// every asset can be reapplied safely.
    pub fn object(&self) -> anyhow::Result<SchemaObject> {
        let invalid = |reason: &str| {
            TrellisError::InvalidSchema(self.name.to_string(), reason.to_string())
        };

        let statement: String = self
            .ddl
            .lines()
            .filter(|line| !line.trim_start().starts_with("--"))
            .collect::<Vec<_>>()
            .join(" ");
        let mut tokens = statement.split_whitespace();

        if !tokens
            .next()
            .is_some_and(|t| t.eq_ignore_ascii_case("CREATE"))
        {
            return Err(invalid("expected CREATE").into());
        }
        let kind = match tokens.next().map(|t| t.to_ascii_uppercase()).as_deref() {
            Some("TYPE") => SchemaObjectKind::Type,
            Some("TABLE") => SchemaObjectKind::Table,
            Some("INDEX") => SchemaObjectKind::Index,
            _ => return Err(invalid("expected TYPE, TABLE or INDEX").into()),
        };
        for expected in ["IF", "NOT", "EXISTS"] {
            if !tokens
                .next()
                .is_some_and(|t| t.eq_ignore_ascii_case(expected))
            {
                return Err(invalid("statement is not idempotent (missing IF NOT EXISTS)").into());
            }
        }
        let name = tokens
            .next()
            .map(|t| t.split('(').next().unwrap_or_default())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| invalid("missing object name"))?;

        Ok(SchemaObject {
            kind,
            name: name.to_string(),
        })
    }
}

/// Statements a session can prepare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statement {
    /// Reminders whose hash lies in `(begin, end]`
    ReminderHashRange,
}

impl Statement {
    pub fn cql(&self) -> &'static str {
        match self {
            Statement::ReminderHashRange => {
                "SELECT * FROM reminders WHERE hash > ? AND hash <= ? ALLOW FILTERING"
            }
        }
    }

    /// Schema objects that must exist before the statement can be prepared
    pub fn required_objects(&self) -> &'static [&'static str] {
        match self {
            Statement::ReminderHashRange => &[REMINDERS_TABLE, REMINDERS_HASH_INDEX],
        }
    }

    /// Prepare against a schema catalog
    pub fn prepare_with(&self, catalog: &[String]) -> anyhow::Result<PreparedStatement> {
        if let Some(missing) = self
            .required_objects()
            .iter()
            .find(|object| !catalog.iter().any(|name| name == *object))
        {
            return Err(TrellisError::SchemaMissing(missing.to_string()).into());
        }
        Ok(PreparedStatement::new(*self))
    }
}

/// Handle of a statement prepared by a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement {
    statement: Statement,
    id: String,
}

impl PreparedStatement {
    pub fn new(statement: Statement) -> Self {
        Self {
            statement,
            id: new_etag(),
        }
    }

    pub fn statement(&self) -> Statement {
        self.statement
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Fail unless this handle was prepared for `statement`
    pub fn ensure(&self, statement: Statement) -> anyhow::Result<()> {
        if self.statement != statement {
            anyhow::bail!(
                "prepared statement {} is '{}', expected '{}'",
                self.id,
                self.statement.cql(),
                statement.cql()
            );
        }
        Ok(())
    }
}
