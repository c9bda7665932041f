//! Virtual nodes and how they are spread over workers

use uuid::Uuid;

/// A routing target aliasing exactly one worker.
///
/// Refers to its worker by index into the owning service's worker table;
/// the node never owns the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualNode {
    id: String,
    worker: usize,
}

impl VirtualNode {
    /// Node `id` forwarding to worker `worker`
    pub fn new(id: impl Into<String>, worker: usize) -> Self {
        Self { id: id.into(), worker }
    }

    /// Node name, also the hash-ring position source
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Index of the backing worker
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// `replica_count` randomly named replicas of one worker
    pub fn replicas(service: &str, worker: usize, replica_count: usize) -> Vec<VirtualNode> {
        let uuid = Uuid::new_v4();
        (0..replica_count)
            .map(|r| VirtualNode::new(format!("{service}-vwn-{uuid}-{r}"), worker))
            .collect()
    }
}

/// How virtual nodes are laid out over workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distribution {
    /// Randomly named replicas per worker, for hash-ring placement
    RandomReplicas,
    /// Node `i` forwards to worker `i % worker_count`
    RoundRobin,
}

/// Build `worker_count * replica_count` virtual nodes
pub fn distribute(
    service: &str,
    worker_count: usize,
    replica_count: usize,
    distribution: Distribution,
) -> Vec<VirtualNode> {
    match distribution {
        Distribution::RandomReplicas => (0..worker_count)
            .flat_map(|w| VirtualNode::replicas(service, w, replica_count))
            .collect(),
        Distribution::RoundRobin => (0..worker_count * replica_count)
            .map(|i| VirtualNode::new(format!("{service}-vwn-{i}"), i % worker_count))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn round_robin_layout_is_deterministic() {
        let nodes = distribute("svc", 3, 2, Distribution::RoundRobin);
        assert_eq!(nodes.len(), 6);
        assert_eq!(nodes[4], VirtualNode::new("svc-vwn-4", 1));
        assert_eq!(nodes, distribute("svc", 3, 2, Distribution::RoundRobin));
    }

    #[test]
    fn replicas_are_unique_and_balanced() {
        let nodes = distribute("svc", 4, 50, Distribution::RandomReplicas);
        assert_eq!(nodes.len(), 200);
        let ids: HashSet<_> = nodes.iter().map(VirtualNode::id).collect();
        assert_eq!(ids.len(), 200);
        for w in 0..4 {
            assert_eq!(nodes.iter().filter(|n| n.worker() == w).count(), 50);
        }
        assert!(nodes[0].id().starts_with("svc-vwn-"));
    }
}
