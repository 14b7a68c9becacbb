//! Pure topology correlation: adjacency graph, application-priority
//! grouping, depth-bounded component search, stable interconnectivity ids.
//!
//! No database access — the processor in
//! [`crate::services::topology_processor`] loads snapshots and alerts and
//! persists the resulting incidents.

use std::collections::{HashMap, HashSet, VecDeque};

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::topology::{TopologyApplication, TopologySnapshot};

/// Undirected service adjacency graph keyed by service name.
///
/// Dependencies are symmetrized: if A depends on B, correlation treats the
/// pair as connected in both directions.
#[derive(Debug, Default)]
pub struct TopologyGraph {
    adjacency: HashMap<String, HashSet<String>>,
}

impl TopologyGraph {
    pub fn from_snapshot(snapshot: &TopologySnapshot) -> Self {
        let mut adjacency: HashMap<String, HashSet<String>> = HashMap::new();
        for service in &snapshot.services {
            adjacency.entry(service.name.clone()).or_default();
        }
        for dep in &snapshot.dependencies {
            adjacency
                .entry(dep.service_name.clone())
                .or_default()
                .insert(dep.depends_on.clone());
            adjacency
                .entry(dep.depends_on.clone())
                .or_default()
                .insert(dep.service_name.clone());
        }
        Self { adjacency }
    }

    pub fn contains(&self, service: &str) -> bool {
        self.adjacency.contains_key(service)
    }

    fn neighbors(&self, service: &str) -> impl Iterator<Item = &String> {
        self.adjacency.get(service).into_iter().flatten()
    }
}

/// One application with its currently alerting member services.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationGroup {
    pub application_id: Uuid,
    pub application_name: String,
    pub services: Vec<String>,
}

/// Result of one correlation pass over a tenant's alerting services.
#[derive(Debug, Clone, Default)]
pub struct TopologyCorrelation {
    pub application_groups: Vec<ApplicationGroup>,
    /// Graph components, each sorted by service name.
    pub components: Vec<Vec<String>>,
}

/// Correlate a tenant's alerting services against its topology.
///
/// Applications are evaluated first, in ascending application-id order; a
/// service claimed by one application is never reconsidered by a later
/// application or by the graph pass. The remaining alerting services are
/// grouped by depth-bounded BFS; components smaller than
/// `minimum_services` are discarded.
pub fn correlate(
    snapshot: &TopologySnapshot,
    alerting_services: &HashSet<String>,
    depth: usize,
    minimum_services: usize,
) -> TopologyCorrelation {
    let graph = TopologyGraph::from_snapshot(snapshot);

    // Alerts for services absent from topology are ignored.
    let alerting: HashSet<&String> = alerting_services
        .iter()
        .filter(|s| graph.contains(s))
        .collect();

    let mut claimed: HashSet<&String> = HashSet::new();
    let mut application_groups = Vec::new();

    // Application-priority pass: ascending id order keeps the outcome
    // deterministic when a service belongs to several applications.
    let mut applications: Vec<&TopologyApplication> = snapshot.applications.iter().collect();
    applications.sort_by_key(|a| a.id);
    for app in applications {
        let mut members: Vec<String> = app
            .service_names
            .iter()
            .filter(|s| alerting.contains(s) && !claimed.contains(s))
            .cloned()
            .collect();
        if members.is_empty() {
            continue;
        }
        members.sort();
        for m in &app.service_names {
            if members.contains(m) {
                claimed.insert(m);
            }
        }
        application_groups.push(ApplicationGroup {
            application_id: app.id,
            application_name: app.name.clone(),
            services: members,
        });
    }

    // Graph pass over whatever the applications did not claim.
    let mut visited: HashSet<&String> = claimed.clone();
    let mut components = Vec::new();
    let mut starts: Vec<&&String> = alerting.iter().collect();
    starts.sort();
    for &start in starts {
        if visited.contains(start) {
            continue;
        }
        let component = bfs_component(&graph, &alerting, &visited, start, depth);
        for s in &component {
            // Even undersized components mark their members visited, so the
            // same services are not re-walked from another start.
            visited.insert(*s);
        }
        if component.len() >= minimum_services.max(1) {
            let mut sorted: Vec<String> = component.iter().map(|s| (*s).clone()).collect();
            sorted.sort();
            components.push(sorted);
        }
    }
    components.sort();

    TopologyCorrelation {
        application_groups,
        components,
    }
}

/// Collect the alerting services reachable from `start` within `depth`
/// hops, traversing only through alerting services.
fn bfs_component<'a>(
    graph: &'a TopologyGraph,
    alerting: &HashSet<&'a String>,
    visited: &HashSet<&'a String>,
    start: &'a String,
    depth: usize,
) -> Vec<&'a String> {
    let mut component = vec![start];
    let mut seen: HashSet<&String> = HashSet::from([start]);
    let mut queue: VecDeque<(&String, usize)> = VecDeque::from([(start, 0)]);

    while let Some((current, dist)) = queue.pop_front() {
        if dist >= depth {
            continue;
        }
        for neighbor in graph.neighbors(current) {
            if seen.contains(neighbor) || visited.contains(neighbor) {
                continue;
            }
            let Some(&neighbor) = alerting.get(neighbor) else {
                continue;
            };
            seen.insert(neighbor);
            component.push(neighbor);
            queue.push_back((neighbor, dist + 1));
        }
    }
    component
}

/// Stable identifier for a correlated service set.
///
/// Hash of the sorted, pipe-joined service names: independent of discovery
/// order and of which alert arrived first.
pub fn interconnectivity_id(services: &[String]) -> String {
    let mut sorted: Vec<&String> = services.iter().collect();
    sorted.sort();
    let joined = sorted
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join("|");

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::topology::{TopologyDependency, TopologyService};

    fn snapshot(services: &[&str], deps: &[(&str, &str)]) -> TopologySnapshot {
        TopologySnapshot {
            services: services
                .iter()
                .map(|name| TopologyService {
                    id: Uuid::new_v4(),
                    tenant_id: Uuid::nil(),
                    name: name.to_string(),
                    display_name: None,
                })
                .collect(),
            dependencies: deps
                .iter()
                .map(|(from, to)| TopologyDependency {
                    id: Uuid::new_v4(),
                    tenant_id: Uuid::nil(),
                    service_name: from.to_string(),
                    depends_on: to.to_string(),
                })
                .collect(),
            applications: Vec::new(),
        }
    }

    fn alerting(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn dependencies_are_symmetrized() {
        // Only A -> B is declared; correlation still connects B to A.
        let snap = snapshot(&["a", "b"], &[("a", "b")]);
        let result = correlate(&snap, &alerting(&["a", "b"]), 3, 2);
        assert_eq!(result.components, vec![vec!["a".to_string(), "b".to_string()]]);
    }

    #[test]
    fn interconnectivity_id_independent_of_order() {
        let forward = vec!["svcA".to_string(), "svcB".to_string(), "svcC".to_string()];
        let shuffled = vec!["svcC".to_string(), "svcA".to_string(), "svcB".to_string()];
        assert_eq!(interconnectivity_id(&forward), interconnectivity_id(&shuffled));
        assert_ne!(
            interconnectivity_id(&forward),
            interconnectivity_id(&["svcA".to_string(), "svcB".to_string()])
        );
    }

    #[test]
    fn component_stable_regardless_of_arrival_order() {
        let snap = snapshot(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
        // Same alerting set expressed in different orders produces the
        // same component and hence the same interconnectivity id.
        let r1 = correlate(&snap, &alerting(&["c", "a", "b"]), 3, 2);
        let r2 = correlate(&snap, &alerting(&["a", "b", "c"]), 3, 2);
        assert_eq!(r1.components, r2.components);
        assert_eq!(
            interconnectivity_id(&r1.components[0]),
            interconnectivity_id(&r2.components[0])
        );
    }

    #[test]
    fn minimum_services_filters_small_components() {
        let snap = snapshot(&["a", "b", "c"], &[("a", "b")]);
        // c alerts alone: below the minimum of 2.
        let result = correlate(&snap, &alerting(&["c"]), 3, 2);
        assert!(result.components.is_empty());
    }

    #[test]
    fn quiet_services_do_not_bridge() {
        // a - quiet - b: with `quiet` not alerting, a and b stay apart.
        let snap = snapshot(&["a", "quiet", "b"], &[("a", "quiet"), ("quiet", "b")]);
        let result = correlate(&snap, &alerting(&["a", "b"]), 5, 2);
        assert!(result.components.is_empty());
    }

    #[test]
    fn depth_bounds_the_walk() {
        let snap = snapshot(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("b", "c"), ("c", "d")],
        );
        let all = alerting(&["a", "b", "c", "d"]);
        // Depth 1 from `a` only reaches b; c and d form their own walk.
        let shallow = correlate(&snap, &all, 1, 2);
        assert_eq!(
            shallow.components,
            vec![
                vec!["a".to_string(), "b".to_string()],
                vec!["c".to_string(), "d".to_string()]
            ]
        );
        // Depth 3 reaches the whole chain.
        let deep = correlate(&snap, &all, 3, 2);
        assert_eq!(
            deep.components,
            vec![vec![
                "a".to_string(),
                "b".to_string(),
                "c".to_string(),
                "d".to_string()
            ]]
        );
    }

    #[test]
    fn unknown_services_are_ignored() {
        let snap = snapshot(&["a", "b"], &[("a", "b")]);
        let result = correlate(&snap, &alerting(&["a", "b", "ghost"]), 3, 2);
        assert_eq!(result.components, vec![vec!["a".to_string(), "b".to_string()]]);
    }

    #[test]
    fn application_pass_claims_before_graph_pass() {
        let mut snap = snapshot(&["web", "api", "db"], &[("web", "api"), ("api", "db")]);
        snap.applications.push(TopologyApplication {
            id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            name: "storefront".into(),
            service_names: vec!["web".to_string(), "api".to_string()],
        });
        let result = correlate(&snap, &alerting(&["web", "api", "db"]), 3, 2);

        assert_eq!(result.application_groups.len(), 1);
        assert_eq!(
            result.application_groups[0].services,
            vec!["api".to_string(), "web".to_string()]
        );
        // db alone is below minimum_services, and web/api are claimed.
        assert!(result.components.is_empty());
    }

    #[test]
    fn overlapping_applications_resolve_by_id_order() {
        let mut snap = snapshot(&["a", "b"], &[]);
        let first = Uuid::from_u128(1);
        let second = Uuid::from_u128(2);
        snap.applications.push(TopologyApplication {
            id: second,
            tenant_id: Uuid::nil(),
            name: "later".into(),
            service_names: vec!["a".to_string(), "b".to_string()],
        });
        snap.applications.push(TopologyApplication {
            id: first,
            tenant_id: Uuid::nil(),
            name: "earlier".into(),
            service_names: vec!["a".to_string()],
        });
        let result = correlate(&snap, &alerting(&["a", "b"]), 3, 1);

        // The lower id claims `a`; the later application keeps only `b`.
        assert_eq!(result.application_groups.len(), 2);
        assert_eq!(result.application_groups[0].application_id, first);
        assert_eq!(result.application_groups[0].services, vec!["a".to_string()]);
        assert_eq!(result.application_groups[1].services, vec!["b".to_string()]);
    }

    #[test]
    fn application_with_no_alerting_member_is_skipped() {
        let mut snap = snapshot(&["a", "b"], &[("a", "b")]);
        snap.applications.push(TopologyApplication {
            id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            name: "idle".into(),
            service_names: vec!["b".to_string()],
        });
        let result = correlate(&snap, &alerting(&["a"]), 3, 1);
        assert!(result.application_groups.is_empty());
        assert_eq!(result.components, vec![vec!["a".to_string()]]);
    }
}
