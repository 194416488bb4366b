//! Helpers for score plugins.

use crate::model::NodeScore;
use crate::status::MAX_NODE_SCORE;

/// Rescale `scores` so that the highest one becomes [`MAX_NODE_SCORE`].
///
/// Scores stay untouched if the highest score is not positive.
pub fn normalize_scores_generic(scores: &mut [NodeScore]) {
    let max_score = scores.iter().map(|s| s.score).max().unwrap_or(0);
    if max_score <= 0 {
        return;
    }
    for node_score in scores.iter_mut() {
        node_score.score = node_score.score * MAX_NODE_SCORE / max_score;
    }
}
