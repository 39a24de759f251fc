// src/lib.rs

//! Condaplan
//!
//! Index caching, dependency structure and transaction reconciliation for
//! conda-compatible environments. Sits between a package solver and the
//! code that links files into a prefix.
//!
//! # Architecture
//!
//! - Repository: channel subdir indices, cached on disk with HTTP validators
//! - Resolver: dependency graph and post-solve dependency policies
//! - Transaction: solver answers re-expressed against the installed prefix
//! - Database: SQLite history of recorded transactions

pub mod config;
pub mod db;
mod error;
pub mod packages;
pub mod repository;
pub mod resolver;
pub mod transaction;

pub use error::{Error, Result};
