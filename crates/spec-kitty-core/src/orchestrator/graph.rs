//! WP dependency graph construction and finalization.
//!
//! Built from the `dependencies` lists in WP file frontmatter. Finalization
//! rejects references to unknown WPs and any cycle; status events reference
//! WPs by id, so the graph carries ids, never pointers.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::graph::DiGraph;

use crate::error::{Error, Result};
use crate::feature::{FeatureDir, WpId};
use crate::frontmatter;
use crate::orchestrator::state::{OrchestrationRun, WpStatus};

/// Map from WP id to its declared dependencies.
pub type DependencyGraph = BTreeMap<WpId, Vec<WpId>>;

/// Read the dependency graph from a feature's WP files.
pub fn build_dependency_graph(feature: &FeatureDir) -> Result<DependencyGraph> {
    let mut graph = DependencyGraph::new();
    for path in feature.wp_files()? {
        let fm = frontmatter::parse_wp_file(&path)?;
        let Some(raw_id) = fm.work_package_id else {
            continue;
        };
        let wp_id = WpId::parse(raw_id.trim())?;
        let deps = fm
            .dependencies
            .iter()
            .map(|d| WpId::parse(d.trim()))
            .collect::<Result<Vec<_>>>()?;
        graph.insert(wp_id, deps);
    }
    Ok(graph)
}

/// Validate the graph: all references resolve, no cycles.
pub fn finalize_graph(graph: &DependencyGraph) -> Result<()> {
    let known: BTreeSet<&WpId> = graph.keys().collect();
    for (wp, deps) in graph {
        for dep in deps {
            if dep == wp {
                return Err(Error::validation(format!(
                    "{wp} declares a dependency on itself"
                )));
            }
            if !known.contains(dep) {
                return Err(Error::validation(format!(
                    "{wp} depends on {dep}, which does not exist in this feature"
                )));
            }
        }
    }

    let mut petgraph: DiGraph<&WpId, ()> = DiGraph::new();
    let mut indices = BTreeMap::new();
    for wp in graph.keys() {
        indices.insert(wp, petgraph.add_node(wp));
    }
    for (wp, deps) in graph {
        for dep in deps {
            if let (Some(&from), Some(&to)) = (indices.get(dep), indices.get(wp)) {
                petgraph.add_edge(from, to, ());
            }
        }
    }
    petgraph::algo::toposort(&petgraph, None).map_err(|cycle| {
        Error::validation(format!(
            "Cyclic work package dependencies involving {}",
            petgraph[cycle.node_id()]
        ))
    })?;
    Ok(())
}

/// Topological order over the graph, ties broken by WP id.
pub fn topo_order(graph: &DependencyGraph) -> Result<Vec<WpId>> {
    finalize_graph(graph)?;
    let mut remaining: BTreeMap<WpId, BTreeSet<WpId>> = graph
        .iter()
        .map(|(wp, deps)| (wp.clone(), deps.iter().cloned().collect()))
        .collect();
    let mut order = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        // BTreeMap iteration gives the id tie-break for free.
        let next = remaining
            .iter()
            .find(|(_, deps)| deps.is_empty())
            .map(|(wp, _)| wp.clone())
            .ok_or_else(|| Error::validation("Cyclic work package dependencies"))?;
        remaining.remove(&next);
        for deps in remaining.values_mut() {
            deps.remove(&next);
        }
        order.push(next);
    }
    Ok(order)
}

/// WPs whose dependencies are all COMPLETED and which are still PENDING.
#[must_use]
pub fn ready_wps(graph: &DependencyGraph, run: &OrchestrationRun) -> Vec<WpId> {
    graph
        .iter()
        .filter(|(wp, deps)| {
            run.work_packages
                .get(*wp)
                .is_some_and(|ex| ex.status == WpStatus::Pending)
                && deps.iter().all(|dep| {
                    run.work_packages
                        .get(dep)
                        .is_some_and(|ex| ex.status == WpStatus::Completed)
                })
        })
        .map(|(wp, _)| wp.clone())
        .collect()
}

/// PENDING WPs whose dependency set contains a FAILED WP.
#[must_use]
pub fn blocked_by_failure(graph: &DependencyGraph, run: &OrchestrationRun) -> Vec<WpId> {
    graph
        .iter()
        .filter(|(wp, deps)| {
            run.work_packages
                .get(*wp)
                .is_some_and(|ex| ex.status == WpStatus::Pending)
                && deps.iter().any(|dep| {
                    run.work_packages
                        .get(dep)
                        .is_some_and(|ex| ex.status == WpStatus::Failed)
                })
        })
        .map(|(wp, _)| wp.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::FeatureSlug;

    fn wp(id: &str) -> WpId {
        WpId::parse(id).unwrap()
    }

    fn graph(edges: &[(&str, &[&str])]) -> DependencyGraph {
        edges
            .iter()
            .map(|(id, deps)| (wp(id), deps.iter().map(|d| wp(d)).collect()))
            .collect()
    }

    #[test]
    fn builds_graph_from_wp_files() {
        let tmp = tempfile::tempdir().unwrap();
        let feature = FeatureDir::new(tmp.path(), FeatureSlug::parse("001-x").unwrap());
        std::fs::create_dir_all(feature.tasks_dir()).unwrap();
        std::fs::write(
            feature.tasks_dir().join("WP01-base.md"),
            "---\nwork_package_id: WP01\nlane: planned\ndependencies: []\n---\n",
        )
        .unwrap();
        std::fs::write(
            feature.tasks_dir().join("WP02-api.md"),
            "---\nwork_package_id: WP02\nlane: planned\ndependencies:\n  - WP01\n---\n",
        )
        .unwrap();

        let graph = build_dependency_graph(&feature).unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph[&wp("WP02")], vec![wp("WP01")]);
        finalize_graph(&graph).unwrap();
    }

    #[test]
    fn unknown_reference_rejected() {
        let g = graph(&[("WP01", &["WP99"])]);
        let err = finalize_graph(&g).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn cycle_rejected() {
        let g = graph(&[("WP01", &["WP02"]), ("WP02", &["WP01"])]);
        let err = finalize_graph(&g).unwrap_err();
        assert!(err.to_string().contains("Cyclic"));
    }

    #[test]
    fn self_dependency_rejected() {
        let g = graph(&[("WP01", &["WP01"])]);
        assert!(finalize_graph(&g).is_err());
    }

    #[test]
    fn topo_order_ties_broken_by_id() {
        let g = graph(&[
            ("WP03", &["WP01"]),
            ("WP02", &["WP01"]),
            ("WP01", &[]),
            ("WP04", &["WP02", "WP03"]),
        ]);
        let order = topo_order(&g).unwrap();
        let ids: Vec<&str> = order.iter().map(WpId::as_str).collect();
        assert_eq!(ids, ["WP01", "WP02", "WP03", "WP04"]);
    }

    #[test]
    fn ready_set_requires_completed_deps() {
        let g = graph(&[("WP01", &[]), ("WP02", &["WP01"])]);
        let mut run = OrchestrationRun::new(
            FeatureSlug::parse("001-x").unwrap(),
            g.keys().cloned().collect::<Vec<_>>(),
        );
        assert_eq!(ready_wps(&g, &run), vec![wp("WP01")]);

        run.work_packages.get_mut(&wp("WP01")).unwrap().status = WpStatus::Completed;
        assert_eq!(ready_wps(&g, &run), vec![wp("WP02")]);
    }

    #[test]
    fn failed_dependency_blocks() {
        let g = graph(&[("WP01", &[]), ("WP02", &["WP01"])]);
        let mut run = OrchestrationRun::new(
            FeatureSlug::parse("001-x").unwrap(),
            g.keys().cloned().collect::<Vec<_>>(),
        );
        run.work_packages.get_mut(&wp("WP01")).unwrap().status = WpStatus::Failed;
        assert_eq!(blocked_by_failure(&g, &run), vec![wp("WP02")]);
        assert!(ready_wps(&g, &run).is_empty());
    }
}
