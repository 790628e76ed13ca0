//! Reciprocal rank fusion over search branch outputs.

use std::collections::HashMap;

use serde::Serialize;

use crate::memory::core::ids::ObjectId;
use crate::memory::storage::graph_store::ScoredObject;

/// Which sub-search produced a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSource {
    /// Fulltext index over names.
    Fulltext,
    /// Vector index over name embeddings.
    Vector,
    /// Neighbourhood traversal.
    Graph,
}

/// One ranked list and its fusion weight.
#[derive(Clone, Copy, Debug)]
pub struct RankedList<'a> {
    /// Branch that produced the list.
    pub source: SearchSource,
    /// Weight applied to `1 / (k + rank)`.
    pub weight: f32,
    /// Results, best first.
    pub results: &'a [ScoredObject],
}

/// A node after fusion.
#[derive(Clone, Debug, Serialize)]
pub struct FusedObject {
    /// Node id.
    pub uuid: ObjectId,
    /// Node name.
    pub name: String,
    /// Node summary.
    pub summary: String,
    /// Fused score.
    pub score: f32,
    /// Branches that returned this node.
    pub sources: Vec<SearchSource>,
}

/// Merge lists by uuid, scoring each node `sum(weight / (k + rank))`, best first.
///
/// Ties keep first-seen order.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn reciprocal_rank_fusion(lists: &[RankedList<'_>], k: f32) -> Vec<FusedObject> {
    let mut fused: Vec<FusedObject> = Vec::new();
    let mut positions: HashMap<ObjectId, usize> = HashMap::new();

    for list in lists {
        for (rank, result) in list.results.iter().enumerate() {
            let contribution = list.weight / (k + (rank + 1) as f32);
            let pos = *positions.entry(result.uuid).or_insert_with(|| {
                fused.push(FusedObject {
                    uuid: result.uuid,
                    name: result.name.clone(),
                    summary: result.summary.clone(),
                    score: 0.0,
                    sources: Vec::new(),
                });
                fused.len() - 1
            });
            let entry = &mut fused[pos];
            entry.score += contribution;
            if !entry.sources.contains(&list.source) {
                entry.sources.push(list.source);
            }
        }
    }

    // Stable sort keeps first-seen order among equal scores.
    fused.sort_by(|a, b| b.score.total_cmp(&a.score));
    fused
}
