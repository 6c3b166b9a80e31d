//! Rank and percentile computation over the scored collection.
//!
//! The store keeps scores only; ranking is an explicit sort-and-scan with
//! SQL window-function semantics: `RANK()` over descending rarity score
//! (ties share a rank, the next distinct value's rank accounts for the tie
//! group) and `PERCENT_RANK()` over ascending order
//! (rows with a strictly lower score divided by N-1, zero for N == 1).

use crate::collection_store::TokenScore;

/// Rank view of one token. Derived on demand, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRank {
    pub token: u32,
    pub rarity_score: f64,
    /// 1-based rank by descending rarity score; tied tokens share it.
    pub rank: u32,
    /// Fraction of tokens with a strictly lower rarity score, in `[0, 1]`.
    pub percent_rank: f64,
}

/// Rank every scored token, ordered by descending rarity score. Tokens with
/// equal scores share rank and percent_rank and are ordered by ascending
/// token between themselves.
pub fn rank_all(scores: &[TokenScore]) -> Vec<TokenRank> {
    let mut ordered: Vec<(u32, f64)> = scores
        .iter()
        .map(|s| (s.token, s.rarity_score))
        .collect();
    ordered.sort_unstable_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let n = ordered.len();
    let mut ranks = Vec::with_capacity(n);
    let mut start = 0;
    while start < n {
        let mut end = start;
        while end + 1 < n && ordered[end + 1].1 == ordered[start].1 {
            end += 1;
        }

        let rank = (start + 1) as u32;
        let strictly_lower = n - 1 - end;
        let percent_rank = if n > 1 {
            strictly_lower as f64 / (n - 1) as f64
        } else {
            0.0
        };

        for &(token, rarity_score) in &ordered[start..=end] {
            ranks.push(TokenRank {
                token,
                rarity_score,
                rank,
                percent_rank,
            });
        }
        start = end + 1;
    }
    ranks
}

/// Single-token rank, computed by counting comparisons instead of
/// materializing the full ranking. Always agrees with the matching entry of
/// [`rank_all`] over the same scores.
pub fn rank_for_token(scores: &[TokenScore], token: u32) -> Option<TokenRank> {
    let target = scores.iter().find(|s| s.token == token)?;

    let n = scores.len();
    let strictly_higher = scores
        .iter()
        .filter(|s| s.rarity_score > target.rarity_score)
        .count();
    let strictly_lower = scores
        .iter()
        .filter(|s| s.rarity_score < target.rarity_score)
        .count();

    Some(TokenRank {
        token,
        rarity_score: target.rarity_score,
        rank: (strictly_higher + 1) as u32,
        percent_rank: if n > 1 {
            strictly_lower as f64 / (n - 1) as f64
        } else {
            0.0
        },
    })
}
