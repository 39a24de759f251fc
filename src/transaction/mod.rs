// src/transaction/mod.rs

//! Turning a solver answer into a prefix transaction
//!
//! The reconciler re-expresses the solver's `(to_link, to_unlink)` lists in
//! terms of the prefix's installed records:
//! - unlink targets must exist in the installed snapshot
//! - link targets must come from a loaded subdir index
//! - the merged package set is ordered dependencies first
//! - the result is a diff against the original snapshot by identity

pub mod prefix;

pub use prefix::PrefixRecords;

use crate::error::{Error, Result};
use crate::packages::{PackageIdentity, PackageRecord, Spec};
use crate::repository::channel::strip_credentials;
use crate::repository::loader::{IndexMetadata, Priority, SubdirHandle};
use crate::resolver::graph::DependencyGraph;
use crate::resolver::{SolveRequest, Solver};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// A package the solver wants linked, as found in a subdir index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRequest {
    /// Subdir URL the package came from, possibly carrying credentials
    pub channel_key: String,
    pub filename: String,
    /// The package's repodata entry
    pub repodata_json: String,
}

/// An installed package the solver wants unlinked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlinkRequest {
    pub channel_key: String,
    pub filename: String,
}

/// Changes to apply to a prefix plus the specs to record in its history
///
/// `unlink` is ordered dependants first, `link` dependencies first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Transaction {
    pub unlink: Vec<PackageRecord>,
    pub link: Vec<PackageRecord>,
    pub specs_to_add: Vec<Spec>,
    pub specs_to_remove: Vec<Spec>,
}

impl Transaction {
    /// Whether applying this transaction leaves the prefix unchanged
    pub fn is_empty(&self) -> bool {
        self.unlink.is_empty() && self.link.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    /// Relink packages named by `specs_to_add` even when unchanged
    pub force_reinstall: bool,
    pub specs_to_add: Vec<Spec>,
    pub specs_to_remove: Vec<Spec>,
}

pub struct Reconciler<'a> {
    index: &'a IndexMetadata,
    options: ReconcileOptions,
}

impl<'a> Reconciler<'a> {
    pub fn new(index: &'a IndexMetadata) -> Self {
        Self {
            index,
            options: ReconcileOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    /// Build the transaction for a solver answer against `installed`
    pub fn reconcile(
        &self,
        to_link: &[LinkRequest],
        to_unlink: &[UnlinkRequest],
        installed: &PrefixRecords,
    ) -> Result<Transaction> {
        let mut working = installed.clone();

        for request in to_unlink {
            match installed.find_by_filename(&request.filename) {
                Some(record) if record.is_virtual() => {
                    warn!("Ignoring request to unlink virtual package {}", record);
                }
                Some(record) => {
                    working.remove(&record.name);
                }
                None => {
                    return Err(Error::MissingInstalledRecord {
                        filename: request.filename.clone(),
                    });
                }
            }
        }

        for request in to_link {
            if let Some(record) = self.link_record(request, installed)? {
                working.insert(record);
            }
        }

        Ok(self.diff(working.iter().cloned(), installed))
    }

    /// Parse a link request into a record with verified provenance
    ///
    /// Returns `None` for virtual packages, which are never linked.
    fn link_record(&self, request: &LinkRequest, installed: &PrefixRecords) -> Result<Option<PackageRecord>> {
        let mut record =
            PackageRecord::from_repodata_fragment("", "", &request.filename, &request.repodata_json)?;
        if record.is_virtual() {
            debug!("Skipping virtual package {} in link set", record.name);
            return Ok(None);
        }

        let entry = self
            .index
            .lookup(&request.channel_key)
            .ok_or_else(|| Error::ReconcileLookup {
                channel: strip_credentials(&request.channel_key),
                filename: request.filename.clone(),
            })?;
        record.channel = entry.channel.clone();
        record.subdir = entry.subdir.clone();

        if let Some(existing) = installed.get(&record.name) {
            if existing.noarch.is_some() {
                record.noarch = existing.noarch.clone();
            }
        }
        Ok(Some(record))
    }

    /// Diff a complete package set against the installed snapshot
    ///
    /// Records are deduplicated by name, the last one winning. Virtual
    /// packages never appear in the result.
    pub fn diff<I>(&self, final_set: I, installed: &PrefixRecords) -> Transaction
    where
        I: IntoIterator<Item = PackageRecord>,
    {
        let merged = PrefixRecords::from_records(final_set.into_iter().filter(|r| !r.is_virtual()));
        let final_precs = DependencyGraph::build(merged.to_vec()).sorted_records();
        let installed_order =
            DependencyGraph::build(installed.iter().filter(|r| !r.is_virtual()).cloned()).sorted_records();

        let installed_ids: HashSet<PackageIdentity> = installed_order.iter().map(PackageRecord::identity).collect();
        let final_ids: HashSet<PackageIdentity> = final_precs.iter().map(PackageRecord::identity).collect();
        let forced: HashSet<&str> = if self.options.force_reinstall {
            self.options.specs_to_add.iter().map(|s| s.name.as_str()).collect()
        } else {
            HashSet::new()
        };

        let unlink: Vec<PackageRecord> = installed_order
            .into_iter()
            .rev()
            .filter(|r| !final_ids.contains(&r.identity()) || forced.contains(r.name.as_str()))
            .collect();
        let link: Vec<PackageRecord> = final_precs
            .into_iter()
            .filter(|r| !installed_ids.contains(&r.identity()) || forced.contains(r.name.as_str()))
            .collect();

        info!("Transaction: {} to unlink, {} to link", unlink.len(), link.len());
        Transaction {
            unlink,
            link,
            specs_to_add: self.options.specs_to_add.clone(),
            specs_to_remove: self.options.specs_to_remove.clone(),
        }
    }
}

/// Reconcile a solver answer with default options
pub fn reconcile(
    to_link: &[LinkRequest],
    to_unlink: &[UnlinkRequest],
    installed: &PrefixRecords,
    index: &IndexMetadata,
) -> Result<Transaction> {
    Reconciler::new(index).reconcile(to_link, to_unlink, installed)
}

/// Run `solver` over loaded indices and reconcile its answer
///
/// Solver problems are returned verbatim as `Error::Solver`.
pub fn solve_and_reconcile(
    solver: &dyn Solver,
    handles: &[(SubdirHandle, Priority)],
    request: &SolveRequest,
    installed: &PrefixRecords,
    force_reinstall: bool,
) -> Result<Transaction> {
    let index = IndexMetadata::from_handles(handles);
    let output = solver.solve(handles, request)?;
    Reconciler::new(&index)
        .with_options(ReconcileOptions {
            force_reinstall,
            specs_to_add: request.specs_to_add.clone(),
            specs_to_remove: request.specs_to_remove.clone(),
        })
        .reconcile(&output.to_link, &output.to_unlink, installed)
}
