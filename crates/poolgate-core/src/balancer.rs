use rand::Rng;

use poolgate_common::Tier;
use poolgate_store::AccountStatusView;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BalanceError {
    #[error("no available {0} accounts")]
    NoAvailableAccounts(Tier),
}

/// Picks one account slot for the requested tier out of a health snapshot.
///
/// Sampling is usage-weighted: accounts with higher recorded usage are more
/// likely to be chosen, spreading load toward accounts known to still have
/// throughput rather than idle or untested ones. When total usage is zero
/// the draw is uniform. Pure function of the snapshot; no mutation, no
/// locks, never substitutes a different tier.
pub fn select(tier: Tier, snapshot: &[AccountStatusView]) -> Result<usize, BalanceError> {
    let partition: Vec<&AccountStatusView> = snapshot
        .iter()
        .filter(|view| tier.matches_name(&view.tier))
        .collect();
    if partition.is_empty() {
        return Err(BalanceError::NoAvailableAccounts(tier));
    }

    let weights: Vec<u64> = partition
        .iter()
        .map(|view| view.usage.max(0) as u64)
        .collect();
    Ok(partition[pick_weighted_index(&weights)].idx)
}

fn pick_weighted_index(weights: &[u64]) -> usize {
    let total: u64 = weights.iter().sum();
    if total == 0 {
        return rand::rng().random_range(0..weights.len());
    }

    let mut roll = rand::rng().random_range(0..total);
    for (index, weight) in weights.iter().enumerate() {
        if roll < *weight {
            return index;
        }
        roll -= weight;
    }

    weights.len() - 1
}
