// src/db/models.rs

//! Data models for the history database

use crate::error::Result;
use crate::transaction::Transaction;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};

/// Which recorded spec list a row belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecAction {
    Add,
    Remove,
}

impl SpecAction {
    pub fn as_str(&self) -> &str {
        match self {
            SpecAction::Add => "add",
            SpecAction::Remove => "remove",
        }
    }
}

/// Which package list a row belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageAction {
    Link,
    Unlink,
}

impl PackageAction {
    pub fn as_str(&self) -> &str {
        match self {
            PackageAction::Link => "link",
            PackageAction::Unlink => "unlink",
        }
    }
}

/// One recorded transaction against a prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub id: Option<i64>,
    pub prefix: String,
    pub created_at: String,
    pub specs_to_add: Vec<String>,
    pub specs_to_remove: Vec<String>,
    /// Unlinked package identities, in execution order
    pub unlink: Vec<String>,
    /// Linked package identities, in execution order
    pub link: Vec<String>,
}

impl Revision {
    /// Create an unsaved revision for a transaction
    pub fn from_transaction(prefix: &str, tx: &Transaction) -> Self {
        Self {
            id: None,
            prefix: prefix.to_string(),
            created_at: Utc::now().to_rfc3339(),
            specs_to_add: tx.specs_to_add.iter().map(|s| s.to_string()).collect(),
            specs_to_remove: tx.specs_to_remove.iter().map(|s| s.to_string()).collect(),
            unlink: tx.unlink.iter().map(|r| r.identity().to_string()).collect(),
            link: tx.link.iter().map(|r| r.identity().to_string()).collect(),
        }
    }

    /// Record `tx` for `prefix` atomically and return the saved revision
    pub fn record(conn: &mut Connection, prefix: &str, tx: &Transaction) -> Result<Self> {
        let mut revision = Self::from_transaction(prefix, tx);
        crate::db::transaction(conn, |db_tx| revision.insert(db_tx))?;
        Ok(revision)
    }

    /// Insert this revision and its spec and package rows
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO revisions (prefix, created_at) VALUES (?1, ?2)",
            params![&self.prefix, &self.created_at],
        )?;
        let id = conn.last_insert_rowid();

        let specs = [
            (SpecAction::Add, &self.specs_to_add),
            (SpecAction::Remove, &self.specs_to_remove),
        ];
        for (action, list) in specs {
            for (position, spec) in list.iter().enumerate() {
                conn.execute(
                    "INSERT INTO revision_specs (revision_id, action, spec, position) VALUES (?1, ?2, ?3, ?4)",
                    params![id, action.as_str(), spec, position as i64],
                )?;
            }
        }

        let packages = [
            (PackageAction::Unlink, &self.unlink),
            (PackageAction::Link, &self.link),
        ];
        for (action, list) in packages {
            for (position, dist) in list.iter().enumerate() {
                conn.execute(
                    "INSERT INTO revision_packages (revision_id, action, dist, position) VALUES (?1, ?2, ?3, ?4)",
                    params![id, action.as_str(), dist, position as i64],
                )?;
            }
        }

        self.id = Some(id);
        Ok(id)
    }

    /// Find a revision by ID
    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let mut stmt = conn.prepare("SELECT id, prefix, created_at FROM revisions WHERE id = ?1")?;
        let revision = stmt.query_row([id], Self::from_row).optional()?;

        match revision {
            Some(mut revision) => {
                revision.load_children(conn, id)?;
                Ok(Some(revision))
            }
            None => Ok(None),
        }
    }

    /// List revisions of a prefix, oldest first
    pub fn list_for_prefix(conn: &Connection, prefix: &str) -> Result<Vec<Self>> {
        let mut stmt =
            conn.prepare("SELECT id, prefix, created_at FROM revisions WHERE prefix = ?1 ORDER BY id")?;
        let mut revisions = stmt
            .query_map([prefix], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for revision in &mut revisions {
            if let Some(id) = revision.id {
                revision.load_children(conn, id)?;
            }
        }
        Ok(revisions)
    }

    fn load_children(&mut self, conn: &Connection, id: i64) -> Result<()> {
        self.specs_to_add = Self::list_column(conn, "revision_specs", "spec", id, SpecAction::Add.as_str())?;
        self.specs_to_remove =
            Self::list_column(conn, "revision_specs", "spec", id, SpecAction::Remove.as_str())?;
        self.unlink = Self::list_column(conn, "revision_packages", "dist", id, PackageAction::Unlink.as_str())?;
        self.link = Self::list_column(conn, "revision_packages", "dist", id, PackageAction::Link.as_str())?;
        Ok(())
    }

    fn list_column(conn: &Connection, table: &str, column: &str, id: i64, action: &str) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} WHERE revision_id = ?1 AND action = ?2 ORDER BY position",
            column, table
        ))?;
        let values = stmt
            .query_map(params![id, action], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(values)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            prefix: row.get(1)?,
            created_at: row.get(2)?,
            specs_to_add: Vec::new(),
            specs_to_remove: Vec::new(),
            unlink: Vec::new(),
            link: Vec::new(),
        })
    }
}
