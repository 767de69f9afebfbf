use crate::fusion::FusedChunk;

#[derive(Debug, Clone)]
pub struct BudgetOutcome {
    pub kept: Vec<FusedChunk>,
    pub tokens_used: usize,
    pub dropped: usize,
}

/// Append chunks in fused order until the next one would overflow `max_tokens`.
/// Everything from that point on is discarded, so a lower-ranked short chunk
/// never jumps ahead of a higher-ranked long one.
pub fn apply_budget(ranked: Vec<FusedChunk>, max_tokens: usize) -> BudgetOutcome {
    let total = ranked.len();
    let mut kept = Vec::new();
    let mut tokens_used = 0usize;

    for fused in ranked {
        let cost = fused.chunk.tokens();
        if tokens_used + cost > max_tokens {
            break;
        }
        tokens_used += cost;
        kept.push(fused);
    }

    let dropped = total - kept.len();
    BudgetOutcome { kept, tokens_used, dropped }
}
