//! Service dependency graph.
//!
//! Built from the scenario in two passes: first index every service and
//! endpoint by `"svc:path"`, then resolve each endpoint's downstream
//! targets into edges, failing on unknown services. A DFS with a
//! recursion stack then rejects dependency cycles.

use std::collections::{HashMap, HashSet};

use maquette_scenario::{Scenario, ScenarioError, endpoint_key, parse_downstream_target};

/// An endpoint's service-time parameters, denormalized from the scenario.
#[derive(Debug, Clone)]
pub struct EndpointNode {
    /// Owning service id.
    pub service: String,
    /// Endpoint path.
    pub path: String,
    /// Mean CPU service time in milliseconds.
    pub mean_cpu_ms: f64,
    /// CPU service time standard deviation in milliseconds.
    pub cpu_sigma_ms: f64,
    /// Mean network latency in milliseconds.
    pub net_mean_ms: f64,
    /// Network latency standard deviation in milliseconds.
    pub net_sigma_ms: f64,
    /// Memory charged per in-flight request, if configured.
    pub default_memory_mb: Option<f64>,
}

/// A downstream call edge between endpoints.
#[derive(Debug, Clone)]
pub struct Edge {
    /// Source endpoint key (`"svc:path"`).
    pub from_key: String,
    /// Target service id.
    pub target_service: String,
    /// Target endpoint path.
    pub target_path: String,
    /// Mean number of calls per completion, if configured.
    pub call_count_mean: Option<f64>,
}

impl Edge {
    /// The target endpoint key (`"svc:path"`).
    pub fn target_key(&self) -> String {
        endpoint_key(&self.target_service, &self.target_path)
    }
}

/// The acyclic service dependency graph for one run.
#[derive(Debug, Default)]
pub struct ServiceGraph {
    services: HashSet<String>,
    endpoints: HashMap<String, EndpointNode>,
    edges: HashMap<String, Vec<Edge>>,
}

impl ServiceGraph {
    /// Builds and validates the graph from a scenario.
    pub fn from_scenario(scenario: &Scenario) -> Result<Self, ScenarioError> {
        let mut graph = ServiceGraph::default();

        // Pass 1: index services and endpoints.
        for service in &scenario.services {
            graph.services.insert(service.id.clone());
            for endpoint in &service.endpoints {
                let key = endpoint_key(&service.id, &endpoint.path);
                graph.endpoints.insert(
                    key,
                    EndpointNode {
                        service: service.id.clone(),
                        path: endpoint.path.clone(),
                        mean_cpu_ms: endpoint.mean_cpu_ms,
                        cpu_sigma_ms: endpoint.cpu_sigma_ms,
                        net_mean_ms: endpoint.net_latency_ms.mean,
                        net_sigma_ms: endpoint.net_latency_ms.sigma,
                        default_memory_mb: endpoint.default_memory_mb,
                    },
                );
            }
        }

        // Pass 2: resolve downstream targets into edges.
        for service in &scenario.services {
            for endpoint in &service.endpoints {
                let from_key = endpoint_key(&service.id, &endpoint.path);
                let mut edges = Vec::with_capacity(endpoint.downstream.len());
                for downstream in &endpoint.downstream {
                    let (target_service, target_path) = parse_downstream_target(&downstream.to)?;
                    if !graph.services.contains(&target_service) {
                        return Err(ScenarioError::UnknownDownstreamTarget {
                            target: downstream.to.clone(),
                            service: target_service,
                        });
                    }
                    edges.push(Edge {
                        from_key: from_key.clone(),
                        target_service,
                        target_path,
                        call_count_mean: downstream.call_count_mean,
                    });
                }
                if !edges.is_empty() {
                    graph.edges.insert(from_key, edges);
                }
            }
        }

        graph.reject_cycles()?;
        Ok(graph)
    }

    /// DFS over endpoint keys with a recursion stack; an edge back into
    /// the stack is a cycle.
    fn reject_cycles(&self) -> Result<(), ScenarioError> {
        let mut visited = HashSet::new();
        let mut stack = HashSet::new();

        for key in self.endpoints.keys() {
            self.dfs(key, &mut visited, &mut stack)?;
        }
        Ok(())
    }

    fn dfs<'a>(
        &'a self,
        key: &'a str,
        visited: &mut HashSet<&'a str>,
        stack: &mut HashSet<&'a str>,
    ) -> Result<(), ScenarioError> {
        if stack.contains(key) {
            return Err(ScenarioError::CycleDetected {
                endpoint: key.to_string(),
            });
        }
        if !visited.insert(key) {
            return Ok(());
        }
        stack.insert(key);

        if let Some(edges) = self.edges.get(key) {
            for edge in edges {
                // Edges to services without a matching endpoint terminate
                // the walk; they cannot extend a cycle.
                let target = edge.target_key();
                if let Some((stored, _)) = self.endpoints.get_key_value(target.as_str()) {
                    self.dfs(stored.as_str(), visited, stack)?;
                }
            }
        }

        stack.remove(key);
        Ok(())
    }

    /// Returns true if the service exists in the graph.
    pub fn service_exists(&self, service: &str) -> bool {
        self.services.contains(service)
    }

    /// Looks up an endpoint by service and path.
    pub fn endpoint(&self, service: &str, path: &str) -> Option<&EndpointNode> {
        self.endpoints.get(&endpoint_key(service, path))
    }

    /// Returns the downstream edges whose target service still exists.
    pub fn resolve_downstream_calls(&self, service: &str, path: &str) -> Vec<&Edge> {
        self.edges
            .get(&endpoint_key(service, path))
            .map(|edges| {
                edges
                    .iter()
                    .filter(|edge| self.services.contains(&edge.target_service))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the number of indexed endpoints.
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn build(yaml: &str) -> Result<ServiceGraph, ScenarioError> {
        let scenario = Scenario::from_yaml(yaml).expect("scenario parses");
        ServiceGraph::from_scenario(&scenario)
    }

    const LINEAR: &str = r#"
hosts:
  - id: h1
    cpu_cores: 2
    memory_gb: 4
services:
  - id: a
    endpoints:
      - path: /x
        mean_cpu_ms: 10
        downstream:
          - to: "b:/y"
            call_count_mean: 2
  - id: b
    endpoints:
      - path: /y
        mean_cpu_ms: 5
"#;

    #[test]
    fn builds_linear_graph() {
        let graph = build(LINEAR).expect("should build");

        assert_eq!(graph.endpoint_count(), 2);
        assert!(graph.service_exists("a"));
        assert!(graph.endpoint("a", "/x").is_some());

        let calls = graph.resolve_downstream_calls("a", "/x");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].target_service, "b");
        assert_eq!(calls[0].target_path, "/y");
        assert!(graph.resolve_downstream_calls("b", "/y").is_empty());
    }

    #[test]
    fn rejects_two_node_cycle() {
        let yaml = r#"
hosts:
  - id: h1
    cpu_cores: 2
    memory_gb: 4
services:
  - id: a
    endpoints:
      - path: /x
        downstream:
          - to: "b:/y"
  - id: b
    endpoints:
      - path: /y
        downstream:
          - to: "a:/x"
"#;
        let err = build(yaml).unwrap_err();
        assert!(matches!(err, ScenarioError::CycleDetected { .. }));
    }

    #[test]
    fn rejects_self_cycle() {
        let yaml = r#"
hosts:
  - id: h1
    cpu_cores: 2
    memory_gb: 4
services:
  - id: a
    endpoints:
      - path: /x
        downstream:
          - to: "a:/x"
"#;
        let err = build(yaml).unwrap_err();
        assert!(matches!(err, ScenarioError::CycleDetected { .. }));
    }

    #[test]
    fn rejects_unknown_downstream_service() {
        let yaml = r#"
hosts:
  - id: h1
    cpu_cores: 2
    memory_gb: 4
services:
  - id: a
    endpoints:
      - path: /x
        downstream:
          - to: "ghost:/y"
"#;
        let err = build(yaml).unwrap_err();
        assert!(matches!(err, ScenarioError::UnknownDownstreamTarget { .. }));
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let yaml = r#"
hosts:
  - id: h1
    cpu_cores: 2
    memory_gb: 4
services:
  - id: a
    endpoints:
      - path: /x
        downstream:
          - to: "b:/y"
          - to: "c:/z"
  - id: b
    endpoints:
      - path: /y
        downstream:
          - to: "d:/w"
  - id: c
    endpoints:
      - path: /z
        downstream:
          - to: "d:/w"
  - id: d
    endpoints:
      - path: /w
"#;
        let graph = build(yaml).expect("diamond should build");
        assert_eq!(graph.resolve_downstream_calls("a", "/x").len(), 2);
    }

    #[test]
    fn rejects_three_node_cycle() {
        let yaml = r#"
hosts:
  - id: h1
    cpu_cores: 2
    memory_gb: 4
services:
  - id: a
    endpoints:
      - path: /x
        downstream:
          - to: "b:/y"
  - id: b
    endpoints:
      - path: /y
        downstream:
          - to: "c:/z"
  - id: c
    endpoints:
      - path: /z
        downstream:
          - to: "a:/x"
"#;
        let err = build(yaml).unwrap_err();
        assert!(matches!(err, ScenarioError::CycleDetected { .. }));
    }

    #[test]
    fn multiple_edges_from_one_endpoint() {
        let yaml = r#"
hosts:
  - id: h1
    cpu_cores: 2
    memory_gb: 4
services:
  - id: a
    endpoints:
      - path: /x
        downstream:
          - to: "b:/y"
            call_count_mean: 2
          - to: "b:/z"
            call_count_mean: 0.5
  - id: b
    endpoints:
      - path: /y
      - path: /z
"#;
        let graph = build(yaml).expect("should build");
        let calls = graph.resolve_downstream_calls("a", "/x");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].call_count_mean, Some(2.0));
        assert_eq!(calls[1].call_count_mean, Some(0.5));
    }

    #[test]
    fn edge_to_service_without_matching_endpoint_is_not_a_cycle() {
        // `b` exists but has no `/missing` endpoint; the edge resolves
        // to the service and terminates the cycle walk there.
        let yaml = r#"
hosts:
  - id: h1
    cpu_cores: 2
    memory_gb: 4
services:
  - id: a
    endpoints:
      - path: /x
        downstream:
          - to: "b:/missing"
  - id: b
    endpoints:
      - path: /y
"#;
        let graph = build(yaml).expect("should build");
        assert_eq!(graph.resolve_downstream_calls("a", "/x").len(), 1);
    }

    #[test]
    fn bare_service_target_maps_to_root() {
        let yaml = r#"
hosts:
  - id: h1
    cpu_cores: 2
    memory_gb: 4
services:
  - id: a
    endpoints:
      - path: /x
        downstream:
          - to: b
  - id: b
    endpoints:
      - path: /
"#;
        let graph = build(yaml).expect("should build");
        let calls = graph.resolve_downstream_calls("a", "/x");
        assert_eq!(calls[0].target_path, "/");
    }
}
