use std::cmp::Ordering;

use ahash::AHashMap;
use tracing::debug;

use crate::bins::UtilityBins;
use crate::error::MineError;

/// A rewritten transaction: parallel arrays of dense item ranks (strictly
/// increasing) and their utilities.
#[derive(Debug, Clone, Default)]
pub(crate) struct TxBuf {
    pub items: Vec<u32>,
    pub utils: Vec<i64>,
}

/// The renamed, filtered, canonically ordered transaction set plus the rank
/// bijection. Built once per run and read-only afterwards.
pub(crate) struct Dataset {
    pub transactions: Vec<TxBuf>,
    /// rank -> original item id, ascending by local-utility bound.
    pub rank_to_item: Vec<i64>,
}

impl Dataset {
    /// Two-pass preprocessing. The first pass accumulates, per original
    /// item, the sum of the totals of the transactions containing it (the
    /// local-utility bound); items below `min_utility` can never be part of
    /// a qualifying itemset and are discarded for good. Survivors get dense
    /// ranks in ascending bound order (ties by original id) and every
    /// transaction is rewritten under that mapping: unmapped items dropped,
    /// duplicates summed, items sorted by rank, empty transactions removed.
    ///
    /// With `sort_for_merge` the rewritten set is ordered back-to-front so
    /// transactions sharing a suffix end up adjacent, which is what makes
    /// the consecutive-merge check in the search effective.
    pub fn build(
        raw: &[(Vec<i64>, Vec<i64>)],
        min_utility: i64,
        sort_for_merge: bool,
    ) -> Result<Dataset, MineError> {
        let mut bound: AHashMap<i64, i64> = AHashMap::new();
        let mut uniq: Vec<i64> = Vec::new();
        for (items, utils) in raw {
            debug_assert_eq!(items.len(), utils.len());
            let mut total = 0i64;
            for (&item, &u) in items.iter().zip(utils) {
                if u < 0 {
                    return Err(MineError::NegativeUtility { item, value: u });
                }
                total += u;
            }
            // A duplicated item still counts the transaction total once.
            uniq.clear();
            uniq.extend_from_slice(items);
            uniq.sort_unstable();
            uniq.dedup();
            for &item in &uniq {
                *bound.entry(item).or_insert(0) += total;
            }
        }

        let mut kept: Vec<(i64, i64)> = bound
            .into_iter()
            .filter(|&(_, lu)| lu >= min_utility)
            .collect();
        kept.sort_unstable_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
        if kept.len() > u32::MAX as usize {
            return Err(MineError::DatasetTooLarge("too many distinct items"));
        }

        let rank_to_item: Vec<i64> = kept.iter().map(|&(item, _)| item).collect();
        let mut item_to_rank: AHashMap<i64, u32> = AHashMap::with_capacity(kept.len());
        for (rank, &(item, _)) in kept.iter().enumerate() {
            item_to_rank.insert(item, rank as u32);
        }

        let mut transactions: Vec<TxBuf> = Vec::with_capacity(raw.len());
        let mut pairs: Vec<(u32, i64)> = Vec::new();
        for (items, utils) in raw {
            pairs.clear();
            pairs.extend(
                items
                    .iter()
                    .zip(utils)
                    .filter_map(|(&item, &u)| item_to_rank.get(&item).map(|&r| (r, u))),
            );
            if pairs.is_empty() {
                continue;
            }
            pairs.sort_unstable_by_key(|&(r, _)| r);
            let mut tx = TxBuf {
                items: Vec::with_capacity(pairs.len()),
                utils: Vec::with_capacity(pairs.len()),
            };
            for &(r, u) in &pairs {
                match tx.items.last() {
                    Some(&last) if last == r => {
                        let n = tx.utils.len() - 1;
                        tx.utils[n] += u;
                    }
                    _ => {
                        tx.items.push(r);
                        tx.utils.push(u);
                    }
                }
            }
            transactions.push(tx);
        }
        if transactions.len() > u32::MAX as usize {
            return Err(MineError::DatasetTooLarge("too many transactions"));
        }

        if sort_for_merge {
            transactions.sort_unstable_by(suffix_order);
        }

        debug!(
            transactions = transactions.len(),
            items = rank_to_item.len(),
            "built utility dataset"
        );
        Ok(Dataset {
            transactions,
            rank_to_item,
        })
    }

    #[inline]
    pub fn n_items(&self) -> usize {
        self.rank_to_item.len()
    }

    /// Root-level bound sweeps: every transaction contributes its full
    /// total to the local bin of each of its items, and its tail sums to
    /// the subtree bins. `bins` must be freshly zeroed.
    pub fn seed_bins(&self, bins: &mut UtilityBins) {
        for tx in &self.transactions {
            bins.accumulate_suffix(&tx.items, &tx.utils, 0);
        }
    }
}

/// Back-to-front transaction order. Comparing from the last item toward the
/// front sorts transactions with long common suffixes next to each other;
/// a transaction that runs out first (a proper suffix of the other) sorts
/// before it.
pub(crate) fn suffix_order(a: &TxBuf, b: &TxBuf) -> Ordering {
    let mut ia = a.items.len();
    let mut ib = b.items.len();
    loop {
        if ia == 0 {
            return if ib == 0 {
                Ordering::Equal
            } else {
                Ordering::Less
            };
        }
        if ib == 0 {
            return Ordering::Greater;
        }
        ia -= 1;
        ib -= 1;
        match a.items[ia].cmp(&b.items[ib]) {
            Ordering::Equal => {}
            other => return other,
        }
    }
}
