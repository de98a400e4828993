use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Virtual nodes placed on the ring for each unit of weight.
pub const VIRTUAL_NODES_PER_WEIGHT: u32 = 160;

/// Largest weight that adds virtual nodes. Heavier entries are clamped.
pub const MAX_WEIGHT: i64 = 1_000;

/// Maps a hash string to one backend name.
///
/// Implementations must be pure: the same key always locates the same name
/// for as long as the instance lives.
pub trait Placement: Send + Sync {
    /// Locate the owner of `key`. `None` only when nothing is placeable.
    fn locate(&self, key: &str) -> Option<&str>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
struct Point {
    hash: u64,
    node: usize,
}

/// Weighted consistent-hash ring.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HashRing {
    nodes: Vec<String>,
    weights: BTreeMap<String, i64>,
    points: Vec<Point>,
}

impl HashRing {
    /// Build a ring from `{name: weight}`. Entries with weight `<= 0` are left
    /// off the ring; weights above [`MAX_WEIGHT`] count as `MAX_WEIGHT`.
    pub fn new<I, S>(weights: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        let weights: BTreeMap<String, i64> = weights
            .into_iter()
            .map(|(name, weight)| (name.into(), weight))
            .filter(|(_, weight)| *weight > 0)
            .collect();

        let nodes: Vec<String> = weights.keys().cloned().collect();
        let mut points = Vec::new();
        for (node, name) in nodes.iter().enumerate() {
            let weight = weights[name].min(MAX_WEIGHT) as u64;
            let replicas = weight * u64::from(VIRTUAL_NODES_PER_WEIGHT);
            for replica in 0..replicas {
                points.push(Point {
                    hash: point_hash(format!("{name}#{replica}").as_bytes()),
                    node,
                });
            }
        }
        points.sort_unstable();

        Self {
            nodes,
            weights,
            points,
        }
    }

    /// Backends on the ring with their weights.
    pub fn weights(&self) -> &BTreeMap<String, i64> {
        &self.weights
    }

    /// Number of backends on the ring.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if no backend is placeable.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Placement for HashRing {
    fn locate(&self, key: &str) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }
        let hash = point_hash(key.as_bytes());
        let idx = self.points.partition_point(|p| p.hash < hash);
        let point = self.points.get(idx).or_else(|| self.points.first())?;
        // A deserialized ring may carry points for nodes it does not list.
        self.nodes.get(point.node).map(String::as_str)
    }
}

fn point_hash(data: &[u8]) -> u64 {
    let digest = blake3::hash(data);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_be_bytes(head)
}
