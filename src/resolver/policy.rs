// src/resolver/policy.rs

//! Dependency-retention policies applied to a solver result
//!
//! A policy reshapes the solver's final package set and the recorded specs
//! before the reconciler turns them into a transaction:
//! - `Default` keeps the solver's answer
//! - `NoDeps` installs the requested packages without their dependencies
//! - `OnlyDeps` installs the dependencies without the requested packages
//! - `UpdateDeps` promotes every dependency of the request to a requested spec

use crate::config::Config;
use crate::packages::{PackageRecord, Spec, dependency_name};
use crate::resolver::graph::DependencyGraph;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

const PYTHON: &str = "python";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DepsPolicy {
    #[default]
    Default,
    NoDeps,
    OnlyDeps,
    UpdateDeps,
}

impl DepsPolicy {
    pub fn as_str(&self) -> &str {
        match self {
            DepsPolicy::Default => "default",
            DepsPolicy::NoDeps => "no-deps",
            DepsPolicy::OnlyDeps => "only-deps",
            DepsPolicy::UpdateDeps => "update-deps",
        }
    }
}

impl FromStr for DepsPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "default" => Ok(DepsPolicy::Default),
            "no-deps" => Ok(DepsPolicy::NoDeps),
            "only-deps" => Ok(DepsPolicy::OnlyDeps),
            "update-deps" => Ok(DepsPolicy::UpdateDeps),
            _ => Err(format!("Invalid deps policy: {}", s)),
        }
    }
}

impl fmt::Display for DepsPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Package set and recorded specs after a policy was applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyOutcome {
    pub final_set: Vec<PackageRecord>,
    pub specs_to_add: Vec<Spec>,
    pub specs_to_remove: Vec<Spec>,
}

impl PolicyOutcome {
    pub fn into_parts(self) -> (Vec<PackageRecord>, Vec<Spec>, Vec<Spec>) {
        (self.final_set, self.specs_to_add, self.specs_to_remove)
    }
}

/// Applies a `DepsPolicy`; pinned specs are never promoted by `UpdateDeps`
#[derive(Debug, Clone, Default)]
pub struct PostSolvePolicyEngine {
    policy: DepsPolicy,
    pinned: Vec<Spec>,
}

impl PostSolvePolicyEngine {
    pub fn new(policy: DepsPolicy) -> Self {
        Self {
            policy,
            pinned: Vec::new(),
        }
    }

    /// Create an engine that keeps the configured `pinned_packages` out of promotion
    pub fn from_config(policy: DepsPolicy, config: &Config) -> Self {
        Self::new(policy).with_pinned(config.pinned_packages.clone())
    }

    pub fn with_pinned(mut self, pinned: Vec<Spec>) -> Self {
        self.pinned = pinned;
        self
    }

    pub fn policy(&self) -> DepsPolicy {
        self.policy
    }

    /// Reshape a solver result; never fails on well-formed input
    pub fn apply(
        &self,
        final_set: &[PackageRecord],
        specs_to_add: &[Spec],
        specs_to_remove: &[Spec],
        installed: &[PackageRecord],
    ) -> PolicyOutcome {
        debug!("Applying {} policy to {} records", self.policy, final_set.len());
        match self.policy {
            DepsPolicy::Default => PolicyOutcome {
                final_set: final_set.to_vec(),
                specs_to_add: specs_to_add.to_vec(),
                specs_to_remove: specs_to_remove.to_vec(),
            },
            DepsPolicy::NoDeps => PolicyOutcome {
                final_set: no_deps(final_set, specs_to_add, specs_to_remove, installed),
                specs_to_add: specs_to_add.to_vec(),
                specs_to_remove: specs_to_remove.to_vec(),
            },
            DepsPolicy::OnlyDeps => only_deps(final_set, specs_to_add, specs_to_remove, installed),
            DepsPolicy::UpdateDeps => PolicyOutcome {
                final_set: final_set.to_vec(),
                specs_to_add: self.update_deps(final_set, specs_to_add, installed),
                specs_to_remove: specs_to_remove.to_vec(),
            },
        }
    }

    /// Requested specs followed by every transitive dependency not pinned
    fn update_deps(&self, final_set: &[PackageRecord], specs_to_add: &[Spec], installed: &[PackageRecord]) -> Vec<Spec> {
        let graph = DependencyGraph::build(final_set.iter().cloned());
        let requested: HashSet<&str> = specs_to_add.iter().map(|s| s.name.as_str()).collect();
        let pinned: HashSet<&str> = self.pinned.iter().map(|s| s.name.as_str()).collect();

        let mut promoted: IndexMap<String, Spec> = IndexMap::new();
        for spec in specs_to_add {
            for &node in graph.nodes_by_name(&spec.name) {
                for ancestor in graph.ancestors_of(node) {
                    let Some(record) = graph.record(ancestor) else {
                        continue;
                    };
                    let name = record.name.as_str();
                    if record.is_virtual() || requested.contains(name) || pinned.contains(name) {
                        continue;
                    }
                    if !promoted.contains_key(name) {
                        promoted.insert(name.to_string(), promoted_spec(record, installed));
                    }
                }
            }
        }

        debug!("Promoted {} dependencies to requested specs", promoted.len());
        specs_to_add.iter().cloned().chain(promoted.into_values()).collect()
    }
}

/// Apply `policy` with no pinned packages
pub fn apply_deps_policy(
    policy: DepsPolicy,
    final_set: &[PackageRecord],
    specs_to_add: &[Spec],
    specs_to_remove: &[Spec],
    installed: &[PackageRecord],
) -> PolicyOutcome {
    PostSolvePolicyEngine::new(policy).apply(final_set, specs_to_add, specs_to_remove, installed)
}

fn matches_any(specs: &[Spec], record: &PackageRecord) -> bool {
    specs.iter().any(|spec| spec.matches(record))
}

fn no_deps(
    final_set: &[PackageRecord],
    specs_to_add: &[Spec],
    specs_to_remove: &[Spec],
    installed: &[PackageRecord],
) -> Vec<PackageRecord> {
    let added: Vec<&PackageRecord> = final_set.iter().filter(|r| matches_any(specs_to_add, r)).collect();
    let added_names: HashSet<String> = added.iter().map(|r| r.name.clone()).collect();

    installed
        .iter()
        .filter(|r| !matches_any(specs_to_remove, r))
        .filter(|r| !added_names.contains(&r.name))
        .chain(added)
        .cloned()
        .collect()
}

fn only_deps(
    final_set: &[PackageRecord],
    specs_to_add: &[Spec],
    specs_to_remove: &[Spec],
    installed: &[PackageRecord],
) -> PolicyOutcome {
    let mut graph = DependencyGraph::build(final_set.iter().cloned());
    let removed = graph.remove_youngest_descendant_nodes_matching(specs_to_add);
    let removed_names: HashSet<&str> = removed.iter().map(|r| r.name.as_str()).collect();

    let mut records: Vec<PackageRecord> = graph.records().cloned().collect();
    for record in &removed {
        if let Some(existing) = installed.iter().find(|i| i.name == record.name) {
            if !matches_any(specs_to_remove, existing) {
                debug!("Keeping installed {} while installing only its dependencies", existing);
                records.push(existing.clone());
            }
        }
    }

    let mut specs: IndexMap<String, Spec> = specs_to_add
        .iter()
        .filter(|spec| !removed_names.contains(spec.name.as_str()))
        .map(|spec| (spec.name.clone(), spec.clone()))
        .collect();
    for record in &removed {
        for dep in &record.depends {
            let name = dependency_name(dep);
            if specs.contains_key(name) || graph.node_by_name(name).is_none() {
                continue;
            }
            match dep.parse::<Spec>() {
                Ok(spec) => {
                    specs.insert(name.to_string(), spec);
                }
                Err(e) => debug!("Skipping dependency of {}: {}", record, e),
            }
        }
    }

    PolicyOutcome {
        final_set: records,
        specs_to_add: specs.into_values().collect(),
        specs_to_remove: specs_to_remove.to_vec(),
    }
}

/// Name-only spec for a promoted dependency; python keeps its installed major.minor
fn promoted_spec(record: &PackageRecord, installed: &[PackageRecord]) -> Spec {
    if record.name != PYTHON {
        return Spec::new(record.name.clone());
    }
    let version = installed
        .iter()
        .find(|r| r.name == PYTHON)
        .map(|r| r.version.as_str())
        .unwrap_or(record.version.as_str());
    let major_minor: Vec<&str> = version.split('.').take(2).collect();
    Spec::with_constraint(PYTHON, format!("{}.*", major_minor.join(".")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkg(name: &str, version: &str, depends: &[&str]) -> PackageRecord {
        PackageRecord::new(name, version, "0").with_depends(depends.iter().copied())
    }

    fn names(records: &[PackageRecord]) -> Vec<&str> {
        records.iter().map(|r| r.name.as_str()).collect()
    }

    fn spec_names(specs: &[Spec]) -> Vec<&str> {
        specs.iter().map(|s| s.name.as_str()).collect()
    }

    fn flask_solution() -> Vec<PackageRecord> {
        vec![
            pkg("flask", "3.0.0", &["itsdangerous >=2.1", "click >=8.1"]),
            pkg("itsdangerous", "2.1.2", &[]),
            pkg("click", "8.1.7", &[]),
        ]
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("only-deps".parse::<DepsPolicy>().unwrap(), DepsPolicy::OnlyDeps);
        assert_eq!(DepsPolicy::UpdateDeps.to_string(), "update-deps");
        assert!("all-deps".parse::<DepsPolicy>().is_err());
    }

    #[test]
    fn test_default_passes_through() {
        let final_set = flask_solution();
        let add = vec![Spec::new("flask")];
        let outcome = apply_deps_policy(DepsPolicy::Default, &final_set, &add, &[], &[]);
        assert_eq!(outcome.final_set, final_set);
        assert_eq!(outcome.specs_to_add, add);
    }

    #[test]
    fn test_only_deps_flask() {
        let outcome = apply_deps_policy(
            DepsPolicy::OnlyDeps,
            &flask_solution(),
            &[Spec::new("flask")],
            &[],
            &[],
        );

        assert_eq!(names(&outcome.final_set), vec!["itsdangerous", "click"]);
        assert_eq!(spec_names(&outcome.specs_to_add), vec!["itsdangerous", "click"]);
        assert_eq!(outcome.specs_to_add[1].constraint.as_deref(), Some(">=8.1"));
    }

    #[test]
    fn test_only_deps_keeps_installed_package() {
        let installed = vec![pkg("flask", "2.3.0", &["click"])];
        let outcome = apply_deps_policy(
            DepsPolicy::OnlyDeps,
            &flask_solution(),
            &[Spec::new("flask")],
            &[],
            &installed,
        );

        assert_eq!(names(&outcome.final_set), vec!["itsdangerous", "click", "flask"]);
        assert_eq!(outcome.final_set[2].version, "2.3.0");

        let outcome = apply_deps_policy(
            DepsPolicy::OnlyDeps,
            &flask_solution(),
            &[Spec::new("flask")],
            &[Spec::new("flask")],
            &installed,
        );
        assert_eq!(names(&outcome.final_set), vec!["itsdangerous", "click"]);
    }

    #[test]
    fn test_only_deps_skips_missing_dependencies() {
        let final_set = vec![pkg("app", "1.0", &["present", "absent >=2"]), pkg("present", "1.0", &[])];
        let outcome = apply_deps_policy(DepsPolicy::OnlyDeps, &final_set, &[Spec::new("app")], &[], &[]);
        assert_eq!(spec_names(&outcome.specs_to_add), vec!["present"]);
    }

    #[test]
    fn test_only_deps_keeps_required_spec() {
        let final_set = vec![pkg("top", "1.0", &["lib"]), pkg("lib", "1.0", &[])];
        let add = vec![Spec::new("lib")];
        let outcome = apply_deps_policy(DepsPolicy::OnlyDeps, &final_set, &add, &[], &[]);
        assert_eq!(outcome.final_set, final_set);
        assert_eq!(outcome.specs_to_add, add);
    }

    #[test]
    fn test_no_deps() {
        let installed = vec![
            pkg("python", "3.11.4", &[]),
            pkg("flask", "2.3.0", &["click"]),
            pkg("requests", "2.31.0", &[]),
        ];
        let outcome = apply_deps_policy(
            DepsPolicy::NoDeps,
            &flask_solution(),
            &[Spec::new("flask")],
            &[Spec::new("requests")],
            &installed,
        );

        assert_eq!(names(&outcome.final_set), vec!["python", "flask"]);
        assert_eq!(outcome.final_set[1].version, "3.0.0");
        assert_eq!(spec_names(&outcome.specs_to_remove), vec!["requests"]);
    }

    #[test]
    fn test_update_deps_promotes_ancestors() {
        let final_set = vec![
            pkg("flask", "3.0.0", &["click", "werkzeug", "python >=3.8"]),
            pkg("click", "8.1.7", &["python"]),
            pkg("werkzeug", "3.0.1", &["markupsafe", "python"]),
            pkg("markupsafe", "2.1.3", &["python"]),
            pkg("python", "3.12.0", &[]),
        ];
        let installed = vec![pkg("python", "3.11.4", &[])];
        let engine = PostSolvePolicyEngine::new(DepsPolicy::UpdateDeps).with_pinned(vec![Spec::new("markupsafe")]);

        let outcome = engine.apply(&final_set, &[Spec::with_constraint("flask", ">=3")], &[], &installed);

        assert_eq!(outcome.final_set, final_set);
        let specs: Vec<String> = outcome.specs_to_add.iter().map(|s| s.to_string()).collect();
        assert_eq!(specs, vec!["flask >=3", "click", "werkzeug", "python 3.11.*"]);
    }

    #[test]
    fn test_update_deps_honours_configured_pins() {
        let config = Config::from_toml(r#"pinned_packages = ["click 8.1.*"]"#).unwrap();
        let final_set = vec![
            pkg("flask", "3.0.0", &["click", "itsdangerous"]),
            pkg("click", "8.1.7", &[]),
            pkg("itsdangerous", "2.1.2", &[]),
        ];

        let engine = PostSolvePolicyEngine::from_config(DepsPolicy::UpdateDeps, &config);
        let outcome = engine.apply(&final_set, &[Spec::new("flask")], &[], &[]);

        assert_eq!(spec_names(&outcome.specs_to_add), vec!["flask", "itsdangerous"]);
    }

    #[test]
    fn test_update_deps_python_from_final_set() {
        let final_set = vec![pkg("six", "1.16.0", &["python"]), pkg("python", "3.12.1", &[])];
        let outcome = apply_deps_policy(DepsPolicy::UpdateDeps, &final_set, &[Spec::new("six")], &[], &[]);
        let specs: Vec<String> = outcome.specs_to_add.iter().map(|s| s.to_string()).collect();
        assert_eq!(specs, vec!["six", "python 3.12.*"]);
    }
}
