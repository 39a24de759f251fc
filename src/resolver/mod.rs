// src/resolver/mod.rs

//! Dependency structure and solver-facing types
//!
//! The solver itself is external; this module defines the contract it is
//! called through plus the graph and policy passes run on its answer.

pub mod graph;
pub mod policy;

pub use graph::DependencyGraph;
pub use policy::{DepsPolicy, PolicyOutcome, PostSolvePolicyEngine, apply_deps_policy};

use crate::error::Error;
use crate::packages::{PackageRecord, Spec};
use crate::repository::loader::{Priority, SubdirHandle};
use crate::transaction::{LinkRequest, UnlinkRequest};
use std::fmt;

/// What the user asked the solver for
#[derive(Debug, Clone, Default)]
pub struct SolveRequest {
    pub specs_to_add: Vec<Spec>,
    pub specs_to_remove: Vec<Spec>,
    pub installed: Vec<PackageRecord>,
    pub pinned: Vec<Spec>,
    pub strict_channel_priority: bool,
}

/// Raw solver answer in terms of repodata entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolverOutput {
    pub to_link: Vec<LinkRequest>,
    pub to_unlink: Vec<UnlinkRequest>,
}

/// Human-readable explanation of why a request cannot be satisfied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverProblems(pub String);

impl fmt::Display for SolverProblems {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<SolverProblems> for Error {
    fn from(problems: SolverProblems) -> Self {
        Error::Solver(problems.0)
    }
}

/// External SAT solver
pub trait Solver {
    fn solve(
        &self,
        index: &[(SubdirHandle, Priority)],
        request: &SolveRequest,
    ) -> std::result::Result<SolverOutput, SolverProblems>;
}
