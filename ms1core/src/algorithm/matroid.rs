use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::data::edge::EdgeTable;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatroidOpts {
    /// Max number of selected edges per feature, on each side.
    pub limit: usize,
    pub name: String,
}

impl Default for MatroidOpts {
    fn default() -> Self {
        Self { limit: 1, name: "bipartite graph".to_string() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub block: Vec<usize>,
    pub limit: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartitionMatroid {
    pub name: String,
    pub blocks: Vec<Block>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartitionMatroidEntry {
    #[serde(rename = "partition-matroid")]
    pub matroid: PartitionMatroid,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatroidIntersection {
    pub name: String,
    pub comment: String,
    #[serde(rename = "partition-matroids")]
    pub partition_matroids: Vec<PartitionMatroidEntry>,
}

/// Constraint document handed to the optimizer next to the similarity matrix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatroidDocument {
    #[serde(rename = "intersection-of-matroids")]
    pub intersection: MatroidIntersection,
}

/// Groups edge indices by the feature they touch, features in first-seen order.
fn partition_by<F>(edges: &EdgeTable, key: F) -> Vec<(usize, Vec<usize>)>
where
    F: Fn(usize) -> usize,
{
    let mut loc: HashMap<usize, usize> = HashMap::new();
    let mut groups: Vec<(usize, Vec<usize>)> = Vec::new();
    for edge_idx in 0..edges.len() {
        let feature = key(edge_idx);
        match loc.get(&feature) {
            Some(&g) => groups[g].1.push(edge_idx),
            None => {
                loc.insert(feature, groups.len());
                groups.push((feature, vec![edge_idx]));
            }
        }
    }
    groups
}

/// Left feature index -> indices of edges incident to it.
pub fn partition_by_left(edges: &EdgeTable) -> Vec<(usize, Vec<usize>)> {
    partition_by(edges, |i| edges.edges[i].left)
}

/// Right feature index -> indices of edges incident to it.
pub fn partition_by_right(edges: &EdgeTable) -> Vec<(usize, Vec<usize>)> {
    partition_by(edges, |i| edges.edges[i].right)
}

fn partition_matroid(
    name: &str,
    groups: Vec<(usize, Vec<usize>)>,
    limit: usize,
) -> PartitionMatroidEntry {
    PartitionMatroidEntry {
        matroid: PartitionMatroid {
            name: name.to_string(),
            blocks: groups.into_iter().map(|(_, block)| Block { block, limit }).collect(),
        },
    }
}

impl MatroidDocument {
    /// Two partition matroids over the edge set, one per side, so that at most
    /// `opts.limit` edges are selected per left feature and per right feature.
    pub fn from_edges(edges: &EdgeTable, opts: &MatroidOpts) -> Self {
        let left = partition_matroid(
            "edges incident to left nodes,V",
            partition_by_left(edges),
            opts.limit,
        );
        let right = partition_matroid(
            "edges incident to right nodes,U",
            partition_by_right(edges),
            opts.limit,
        );
        MatroidDocument {
            intersection: MatroidIntersection {
                name: opts.name.clone(),
                comment: String::new(),
                partition_matroids: vec![left, right],
            },
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
