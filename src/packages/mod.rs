// src/packages/mod.rs

//! Package descriptors shared by every layer
//!
//! This module provides the immutable `PackageRecord` describing one concrete
//! build of a package, and `Spec`, the name-plus-constraint form that users
//! and dependency lists use to refer to packages.

pub mod record;
pub mod spec;

pub use record::{PackageIdentity, PackageRecord, PackageType};
pub use spec::{Spec, dependency_name};
