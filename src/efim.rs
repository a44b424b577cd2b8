use std::fs::File;
use std::sync::atomic::{AtomicBool, Ordering};

use numpy::{IntoPyArray, PyArray1, PyReadonlyArray1};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use rayon::prelude::*;
use tracing::debug;

use crate::bins::UtilityBins;
use crate::dataset::{Dataset, TxBuf};
use crate::error::MineError;
use crate::sink::{flatten_patterns, LineSink, PatternCollector, PatternSink};

/// Root extensions below this count are mined sequentially.
const PAR_ITEMS_CUTOFF: usize = 4;

/// Mining parameters. `min_utility` is an inclusive threshold and must be
/// non-negative; the pruning bounds are not sound otherwise.
#[derive(Debug, Clone)]
pub(crate) struct EfimConfig {
    pub min_utility: i64,
    pub max_len: Option<usize>,
    pub merge_transactions: bool,
    pub subtree_prune: bool,
    /// Suffixes longer than this are never merge-compared; past a point the
    /// comparisons cost more than the merge saves.
    pub merge_size_cap: usize,
}

impl Default for EfimConfig {
    fn default() -> Self {
        EfimConfig {
            min_utility: 0,
            max_len: None,
            merge_transactions: true,
            subtree_prune: true,
            merge_size_cap: 1000,
        }
    }
}

impl EfimConfig {
    fn validate(&self) -> Result<(), MineError> {
        if self.min_utility < 0 {
            return Err(MineError::InvalidMinUtility(self.min_utility));
        }
        Ok(())
    }
}

/// Where a projected suffix lives: a transaction of the base dataset, or a
/// merge buffer owned by some branch of the search.
#[derive(Debug, Clone, Copy)]
enum TxSource {
    Base(u32),
    Merged(u32),
}

/// A suffix view of one transaction, starting just past the last matched
/// extension item. `offset` is the scan-skip cursor: positions below it
/// have been ruled out for every remaining candidate, and only ever moves
/// forward because candidates are probed in ascending rank order.
#[derive(Debug, Clone, Copy)]
struct ProjTx {
    source: TxSource,
    start: u32,
    offset: u32,
    prefix_util: i64,
}

#[inline]
fn slices<'t>(base: &'t [TxBuf], merged: &'t [TxBuf], t: &ProjTx) -> (&'t [u32], &'t [i64]) {
    let buf = match t.source {
        TxSource::Base(i) => &base[i as usize],
        TxSource::Merged(i) => &merged[i as usize],
    };
    let s = t.start as usize;
    (&buf.items[s..], &buf.utils[s..])
}

/// Per-task mining state: pooled bound bins, the merge-buffer arena (stack
/// discipline — truncated when the branch that created an entry returns),
/// the prefix stack, and a reusable emission buffer. Nothing here is shared
/// between tasks.
struct MineCtx<'a> {
    cfg: &'a EfimConfig,
    dataset: &'a Dataset,
    bins: UtilityBins,
    merged: Vec<TxBuf>,
    prefix: Vec<u32>,
    emit_buf: Vec<i64>,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> MineCtx<'a> {
    fn new(cfg: &'a EfimConfig, dataset: &'a Dataset, cancel: Option<&'a AtomicBool>) -> Self {
        MineCtx {
            cfg,
            dataset,
            bins: UtilityBins::new(dataset.n_items()),
            merged: Vec::new(),
            prefix: Vec::new(),
            emit_buf: Vec::new(),
            cancel,
        }
    }

    #[inline]
    fn cancelled(&self) -> bool {
        self.cancel.map_or(false, |flag| flag.load(Ordering::Relaxed))
    }
}

enum Probe {
    Absent(u32),
    Last { pu: i64, end: u32 },
    Found { start: u32, pu: i64 },
}

/// Project `db` onto extension item `e`.
///
/// Returns the projected transaction list and the exact utility of the
/// current prefix extended by `e`. A transaction whose match is its last
/// item contributes to the exact utility without materializing an empty
/// suffix. A transaction without `e` has its cursor advanced to the
/// binary-search insertion point, so the next candidate never rescans the
/// ruled-out range.
fn project(
    cfg: &EfimConfig,
    base: &[TxBuf],
    merged: &mut Vec<TxBuf>,
    db: &mut [ProjTx],
    e: u32,
) -> (Vec<ProjTx>, i64) {
    let mark = merged.len();
    let mut out: Vec<ProjTx> = Vec::with_capacity(db.len());
    let mut exact = 0i64;

    for t in db.iter_mut() {
        let probe = {
            let buf = match t.source {
                TxSource::Base(i) => &base[i as usize],
                TxSource::Merged(i) => &merged[i as usize],
            };
            let off = t.offset as usize;
            match buf.items[off..].binary_search(&e) {
                Err(rel) => Probe::Absent((off + rel) as u32),
                Ok(rel) => {
                    let p = off + rel;
                    let pu = t.prefix_util + buf.utils[p];
                    if p + 1 == buf.items.len() {
                        Probe::Last {
                            pu,
                            end: (p + 1) as u32,
                        }
                    } else {
                        Probe::Found {
                            start: (p + 1) as u32,
                            pu,
                        }
                    }
                }
            }
        };
        match probe {
            Probe::Absent(insertion) => {
                t.offset = insertion;
            }
            Probe::Last { pu, end } => {
                exact += pu;
                t.offset = end; // exhausted for every later candidate
            }
            Probe::Found { start, pu } => {
                exact += pu;
                t.offset = start;
                let cand = ProjTx {
                    source: t.source,
                    start,
                    offset: start,
                    prefix_util: pu,
                };
                push_or_merge(cfg, base, merged, mark, &mut out, cand);
            }
        }
    }

    (out, exact)
}

/// Append `cand` to the projected list, folding it into the previous entry
/// when both remaining item sequences are identical (the suffix-order sort
/// of the dataset makes such pairs adjacent). Only buffers created for the
/// current extension (index >= `mark`) may be grown in place; older ones
/// belong to an ancestor branch and are combined into a fresh buffer.
fn push_or_merge(
    cfg: &EfimConfig,
    base: &[TxBuf],
    merged: &mut Vec<TxBuf>,
    mark: usize,
    out: &mut Vec<ProjTx>,
    cand: ProjTx,
) {
    if cfg.merge_transactions {
        if let Some(&prev) = out.last() {
            let mergeable = {
                let (ci, _) = slices(base, &merged[..], &cand);
                let (pi, _) = slices(base, &merged[..], &prev);
                ci.len() <= cfg.merge_size_cap && ci == pi
            };
            if mergeable {
                match prev.source {
                    TxSource::Merged(mi) if (mi as usize) >= mark => {
                        let (older, own) = merged.split_at_mut(mark);
                        let cu: &[i64] = match cand.source {
                            TxSource::Base(i) => &base[i as usize].utils[cand.start as usize..],
                            TxSource::Merged(j) => &older[j as usize].utils[cand.start as usize..],
                        };
                        let target = &mut own[mi as usize - mark];
                        for (acc, &u) in target.utils.iter_mut().zip(cu) {
                            *acc += u;
                        }
                        if let Some(last) = out.last_mut() {
                            last.prefix_util += cand.prefix_util;
                        }
                    }
                    _ => {
                        let combined = {
                            let (ci, cu) = slices(base, &merged[..], &cand);
                            let (_, pu) = slices(base, &merged[..], &prev);
                            let mut utils = pu.to_vec();
                            for (acc, &u) in utils.iter_mut().zip(cu) {
                                *acc += u;
                            }
                            TxBuf {
                                items: ci.to_vec(),
                                utils,
                            }
                        };
                        merged.push(combined);
                        let mi = (merged.len() - 1) as u32;
                        if let Some(last) = out.last_mut() {
                            *last = ProjTx {
                                source: TxSource::Merged(mi),
                                start: 0,
                                offset: 0,
                                prefix_util: prev.prefix_util + cand.prefix_util,
                            };
                        }
                    }
                }
                return;
            }
        }
    }
    out.push(cand);
}

fn split_by_bounds(bins: &UtilityBins, candidates: &[u32], cfg: &EfimConfig) -> (Vec<u32>, Vec<u32>) {
    let mut secondary = Vec::with_capacity(candidates.len());
    let mut primary = Vec::with_capacity(candidates.len());
    for &c in candidates {
        if bins.local(c) >= cfg.min_utility {
            secondary.push(c);
            if !cfg.subtree_prune || bins.subtree(c) >= cfg.min_utility {
                primary.push(c);
            }
        }
    }
    (secondary, primary)
}

/// Recompute both bounds over the freshly projected set and split the
/// candidate items into those still worth carrying (`secondary`) and those
/// worth recursing into (`primary`, a subset of `secondary`).
fn partition_candidates(
    ctx: &mut MineCtx<'_>,
    db: &[ProjTx],
    candidates: &[u32],
) -> (Vec<u32>, Vec<u32>) {
    ctx.bins.reset(candidates);
    for t in db {
        let (items, utils) = slices(&ctx.dataset.transactions, &ctx.merged, t);
        ctx.bins.accumulate_suffix(items, utils, t.prefix_util);
    }
    split_by_bounds(&ctx.bins, candidates, ctx.cfg)
}

fn emit<S: PatternSink>(
    ctx: &mut MineCtx<'_>,
    sink: &mut S,
    e: u32,
    utility: i64,
) -> Result<(), MineError> {
    ctx.emit_buf.clear();
    for &r in ctx.prefix.iter() {
        ctx.emit_buf.push(ctx.dataset.rank_to_item[r as usize]);
    }
    ctx.emit_buf.push(ctx.dataset.rank_to_item[e as usize]);
    sink.accept(&ctx.emit_buf, utility)
}

fn process_extension<S: PatternSink>(
    ctx: &mut MineCtx<'_>,
    sink: &mut S,
    db: &mut [ProjTx],
    secondary: &[u32],
    e: u32,
) -> Result<(), MineError> {
    let mark = ctx.merged.len();
    let (mut proj, exact) = project(ctx.cfg, &ctx.dataset.transactions, &mut ctx.merged, db, e);
    if exact >= ctx.cfg.min_utility {
        emit(ctx, sink, e, exact)?;
    }

    let may_grow = ctx.cfg.max_len.map_or(true, |ml| ctx.prefix.len() + 1 < ml);
    let mut res = Ok(());
    if !proj.is_empty() && may_grow {
        let from = secondary.partition_point(|&s| s <= e);
        let candidates = &secondary[from..];
        if !candidates.is_empty() {
            let (new_secondary, new_primary) = partition_candidates(ctx, &proj, candidates);
            if !new_primary.is_empty() {
                ctx.prefix.push(e);
                res = search(ctx, sink, &mut proj, &new_secondary, &new_primary);
                ctx.prefix.pop();
            }
        }
    }
    ctx.merged.truncate(mark);
    res
}

/// Depth-first pattern growth: try each primary item as the next extension
/// of the current prefix, in ascending rank order. Bottoms out when no
/// primary candidates remain; the stack depth is bounded by the number of
/// surviving distinct items.
fn search<S: PatternSink>(
    ctx: &mut MineCtx<'_>,
    sink: &mut S,
    db: &mut [ProjTx],
    secondary: &[u32],
    primary: &[u32],
) -> Result<(), MineError> {
    for &e in primary {
        if ctx.cancelled() {
            break;
        }
        process_extension(ctx, sink, db, secondary, e)?;
    }
    Ok(())
}

fn root_db(dataset: &Dataset) -> Vec<ProjTx> {
    (0..dataset.transactions.len() as u32)
        .map(|i| ProjTx {
            source: TxSource::Base(i),
            start: 0,
            offset: 0,
            prefix_util: 0,
        })
        .collect()
}

fn root_candidates(dataset: &Dataset, cfg: &EfimConfig) -> (Vec<u32>, Vec<u32>) {
    let mut bins = UtilityBins::new(dataset.n_items());
    dataset.seed_bins(&mut bins);
    let all: Vec<u32> = (0..dataset.n_items() as u32).collect();
    split_by_bounds(&bins, &all, cfg)
}

/// Run the search over `raw` transactions, collecting qualifying patterns
/// in memory. Root extensions fan out across the rayon pool when there are
/// enough of them; each task owns its projected list, bins, and merge
/// arena, so subtrees share no mutable state, and the per-task outputs are
/// concatenated in root-item order after the join.
pub(crate) fn mine(
    raw: &[(Vec<i64>, Vec<i64>)],
    cfg: &EfimConfig,
    cancel: Option<&AtomicBool>,
) -> Result<Vec<(i64, Vec<i64>)>, MineError> {
    cfg.validate()?;
    if cfg.max_len == Some(0) {
        return Ok(Vec::new());
    }
    let dataset = Dataset::build(raw, cfg.min_utility, cfg.merge_transactions)?;
    let (secondary, primary) = root_candidates(&dataset, cfg);

    let patterns = if primary.len() >= PAR_ITEMS_CUTOFF {
        let per_item: Vec<Vec<(i64, Vec<i64>)>> = primary
            .par_iter()
            .map(|&e| {
                let mut ctx = MineCtx::new(cfg, &dataset, cancel);
                if ctx.cancelled() {
                    return Ok(Vec::new());
                }
                let mut collector = PatternCollector::default();
                let mut db = root_db(&dataset);
                process_extension(&mut ctx, &mut collector, &mut db, &secondary, e)?;
                Ok(collector.patterns)
            })
            .collect::<Result<_, MineError>>()?;
        per_item.into_iter().flatten().collect()
    } else {
        let mut ctx = MineCtx::new(cfg, &dataset, cancel);
        let mut collector = PatternCollector::default();
        let mut db = root_db(&dataset);
        search(&mut ctx, &mut collector, &mut db, &secondary, &primary)?;
        collector.patterns
    };

    debug!(patterns = patterns.len(), "mining finished");
    Ok(patterns)
}

/// Sequential variant that streams each pattern to `sink` the moment it is
/// found. Emission is monotonic, so a cancelled run has simply written a
/// valid prefix of the output.
pub(crate) fn mine_to_sink<S: PatternSink>(
    raw: &[(Vec<i64>, Vec<i64>)],
    cfg: &EfimConfig,
    cancel: Option<&AtomicBool>,
    sink: &mut S,
) -> Result<(), MineError> {
    cfg.validate()?;
    if cfg.max_len == Some(0) {
        return Ok(());
    }
    let dataset = Dataset::build(raw, cfg.min_utility, cfg.merge_transactions)?;
    let (secondary, primary) = root_candidates(&dataset, cfg);
    let mut ctx = MineCtx::new(cfg, &dataset, cancel);
    let mut db = root_db(&dataset);
    search(&mut ctx, sink, &mut db, &secondary, &primary)
}

fn to_transactions(
    items_list: Vec<Vec<i64>>,
    utils_list: Vec<Vec<i64>>,
) -> PyResult<Vec<(Vec<i64>, Vec<i64>)>> {
    if items_list.len() != utils_list.len() {
        return Err(PyValueError::new_err(
            "items_list and utils_list must have the same length",
        ));
    }
    let mut raw = Vec::with_capacity(items_list.len());
    for (items, utils) in items_list.into_iter().zip(utils_list) {
        if items.len() != utils.len() {
            return Err(PyValueError::new_err(
                "each inner list of items and utils must have the same length",
            ));
        }
        raw.push((items, utils));
    }
    Ok(raw)
}

#[pyfunction]
#[pyo3(signature = (items_list, utils_list, min_utility, max_len=None, merge_transactions=true, subtree_prune=true, merge_size_cap=1000))]
pub fn efim(
    items_list: Vec<Vec<i64>>,
    utils_list: Vec<Vec<i64>>,
    min_utility: i64,
    max_len: Option<usize>,
    merge_transactions: bool,
    subtree_prune: bool,
    merge_size_cap: usize,
) -> PyResult<(Vec<i64>, Vec<Vec<i64>>)> {
    let raw = to_transactions(items_list, utils_list)?;
    let cfg = EfimConfig {
        min_utility,
        max_len,
        merge_transactions,
        subtree_prune,
        merge_size_cap,
    };
    let found = mine(&raw, &cfg, None)?;

    let mut utilities = Vec::with_capacity(found.len());
    let mut patterns = Vec::with_capacity(found.len());
    for (utility, items) in found {
        utilities.push(utility);
        patterns.push(items);
    }
    Ok((utilities, patterns))
}

#[pyfunction]
#[pyo3(signature = (indptr, indices, values, min_utility, max_len=None, merge_transactions=true, subtree_prune=true, merge_size_cap=1000))]
pub fn efim_from_csr<'py>(
    py: Python<'py>,
    indptr: PyReadonlyArray1<i64>,
    indices: PyReadonlyArray1<i64>,
    values: PyReadonlyArray1<i64>,
    min_utility: i64,
    max_len: Option<usize>,
    merge_transactions: bool,
    subtree_prune: bool,
    merge_size_cap: usize,
) -> PyResult<(
    Bound<'py, PyArray1<i64>>,
    Bound<'py, PyArray1<u32>>,
    Bound<'py, PyArray1<i64>>,
)> {
    let ip = indptr.as_slice()?;
    let ix = indices.as_slice()?;
    let vs = values.as_slice()?;
    if ix.len() != vs.len() {
        return Err(PyValueError::new_err(
            "indices and values must have the same length",
        ));
    }

    let mut raw = Vec::with_capacity(ip.len().saturating_sub(1));
    for r in 0..ip.len().saturating_sub(1) {
        let start = ip[r];
        let end = ip[r + 1];
        if start < 0 || end < start || end as usize > ix.len() {
            return Err(PyValueError::new_err("malformed indptr"));
        }
        let (start, end) = (start as usize, end as usize);
        raw.push((ix[start..end].to_vec(), vs[start..end].to_vec()));
    }

    let cfg = EfimConfig {
        min_utility,
        max_len,
        merge_transactions,
        subtree_prune,
        merge_size_cap,
    };
    let (utilities, offsets, items) = flatten_patterns(mine(&raw, &cfg, None)?);
    Ok((
        utilities.into_pyarray(py),
        offsets.into_pyarray(py),
        items.into_pyarray(py),
    ))
}

/// Mine straight to a file, one `<item ids> #UTIL: <utility>` line per
/// pattern. Returns the number of patterns written.
#[pyfunction]
#[pyo3(signature = (items_list, utils_list, min_utility, path, max_len=None, merge_transactions=true, subtree_prune=true, merge_size_cap=1000))]
pub fn efim_to_path(
    items_list: Vec<Vec<i64>>,
    utils_list: Vec<Vec<i64>>,
    min_utility: i64,
    path: String,
    max_len: Option<usize>,
    merge_transactions: bool,
    subtree_prune: bool,
    merge_size_cap: usize,
) -> PyResult<usize> {
    let raw = to_transactions(items_list, utils_list)?;
    let cfg = EfimConfig {
        min_utility,
        max_len,
        merge_transactions,
        subtree_prune,
        merge_size_cap,
    };
    let file = File::create(&path).map_err(MineError::from)?;
    let mut sink = LineSink::new(file);
    mine_to_sink(&raw, &cfg, None, &mut sink)?;
    Ok(sink.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::prelude::*;
    use std::collections::BTreeSet;

    type Raw = Vec<(Vec<i64>, Vec<i64>)>;

    fn cfg(min_utility: i64) -> EfimConfig {
        EfimConfig {
            min_utility,
            ..EfimConfig::default()
        }
    }

    fn result_set(patterns: Vec<(i64, Vec<i64>)>) -> BTreeSet<(Vec<i64>, i64)> {
        patterns
            .into_iter()
            .map(|(u, mut items)| {
                items.sort_unstable();
                (items, u)
            })
            .collect()
    }

    /// Exhaustive reference: every itemset contained in at least one
    /// transaction, with its utility summed over exactly the transactions
    /// containing all of it.
    fn brute_force(raw: &Raw, min_utility: i64) -> BTreeSet<(Vec<i64>, i64)> {
        let mut universe: Vec<i64> = raw
            .iter()
            .flat_map(|(items, _)| items.iter().copied())
            .collect();
        universe.sort_unstable();
        universe.dedup();

        let mut out = BTreeSet::new();
        let n = universe.len();
        for mask in 1u32..(1u32 << n) {
            let set: Vec<i64> = (0..n)
                .filter(|&i| mask & (1 << i) != 0)
                .map(|i| universe[i])
                .collect();
            let mut utility = 0i64;
            let mut supported = false;
            for (items, utils) in raw {
                let mut tx_util = 0i64;
                let mut all = true;
                for &wanted in &set {
                    let mut hit = false;
                    for (&item, &u) in items.iter().zip(utils) {
                        if item == wanted {
                            tx_util += u;
                            hit = true;
                        }
                    }
                    if !hit {
                        all = false;
                        break;
                    }
                }
                if all {
                    supported = true;
                    utility += tx_util;
                }
            }
            if supported && utility >= min_utility {
                out.insert((set, utility));
            }
        }
        out
    }

    fn random_raw(rng: &mut StdRng, n_items: i64, n_tx: usize) -> Raw {
        (0..n_tx)
            .map(|_| {
                let mut ids: Vec<i64> = (1..=n_items).collect();
                ids.shuffle(rng);
                ids.truncate(rng.random_range(1..=n_items) as usize);
                let utils = ids.iter().map(|_| rng.random_range(0..8)).collect();
                (ids, utils)
            })
            .collect()
    }

    #[test]
    fn mines_expected_patterns_on_tiny_dataset() {
        // a=1: util 1 in both transactions; b=2: util 2; c=3: util 5
        let raw = vec![(vec![1, 2], vec![1, 2]), (vec![1, 3], vec![1, 5])];
        let got = result_set(mine(&raw, &cfg(3), None).unwrap());
        let want: BTreeSet<(Vec<i64>, i64)> =
            [(vec![1, 2], 3), (vec![1, 3], 6), (vec![3], 5)]
                .into_iter()
                .collect();
        assert_eq!(got, want);
    }

    #[test]
    fn includes_itemsets_meeting_the_threshold_exactly() {
        let raw = vec![(vec![4, 5], vec![2, 5])];
        let got = result_set(mine(&raw, &cfg(7), None).unwrap());
        assert!(got.contains(&(vec![4, 5], 7)));
        assert_eq!(got.len(), 1);
    }

    #[test]
    fn empty_dataset_yields_empty_result() {
        let raw: Raw = Vec::new();
        assert!(mine(&raw, &cfg(10), None).unwrap().is_empty());
        // fully filtered is the same as empty
        let raw = vec![(vec![1], vec![1])];
        assert!(mine(&raw, &cfg(100), None).unwrap().is_empty());
    }

    #[test]
    fn matches_brute_force_across_configs() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for trial in 0..40 {
            let raw = random_raw(&mut rng, 6, 7);
            let min_utility = rng.random_range(1..30);
            let expected = brute_force(&raw, min_utility);
            for merge_transactions in [false, true] {
                for subtree_prune in [false, true] {
                    let cfg = EfimConfig {
                        min_utility,
                        merge_transactions,
                        subtree_prune,
                        ..EfimConfig::default()
                    };
                    let patterns = mine(&raw, &cfg, None).unwrap();
                    let n = patterns.len();
                    let got = result_set(patterns);
                    assert_eq!(n, got.len(), "duplicate emission in trial {}", trial);
                    assert_eq!(
                        got, expected,
                        "trial {} merge={} subtree={}",
                        trial, merge_transactions, subtree_prune
                    );
                }
            }
        }
    }

    #[test]
    fn merging_does_not_change_results() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            // few distinct items over many transactions forces shared suffixes
            let raw = random_raw(&mut rng, 4, 10);
            let min_utility = rng.random_range(1..25);
            let on = mine(&raw, &cfg(min_utility), None).unwrap();
            let off = mine(
                &raw,
                &EfimConfig {
                    min_utility,
                    merge_transactions: false,
                    ..EfimConfig::default()
                },
                None,
            )
            .unwrap();
            assert_eq!(result_set(on), result_set(off));
        }
    }

    #[test]
    fn merges_identical_transactions_without_changing_utilities() {
        let raw: Raw = vec![
            (vec![1, 2, 3], vec![1, 2, 1]),
            (vec![1, 2, 3], vec![2, 1, 3]),
            (vec![1, 2, 3], vec![1, 1, 1]),
            (vec![2, 3], vec![4, 1]),
        ];
        let got = result_set(mine(&raw, &cfg(1), None).unwrap());
        assert_eq!(got, brute_force(&raw, 1));
        // a tiny cap disables merging without affecting the result
        let capped = mine(
            &raw,
            &EfimConfig {
                min_utility: 1,
                merge_size_cap: 0,
                ..EfimConfig::default()
            },
            None,
        )
        .unwrap();
        assert_eq!(result_set(capped), brute_force(&raw, 1));
    }

    #[test]
    fn repeated_runs_are_identical() {
        let mut rng = StdRng::seed_from_u64(99);
        let raw = random_raw(&mut rng, 6, 8);
        let first = mine(&raw, &cfg(5), None).unwrap();
        let second = mine(&raw, &cfg(5), None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn zero_threshold_enumerates_every_supported_itemset() {
        let raw: Raw = vec![(vec![1, 2], vec![0, 3]), (vec![2, 3], vec![1, 0])];
        let got = result_set(mine(&raw, &cfg(0), None).unwrap());
        let supported = brute_force(&raw, 0);
        assert!(supported.is_subset(&got));
        assert!(got.iter().all(|&(_, u)| u >= 0));
    }

    #[test]
    fn max_len_bounds_pattern_size() {
        let mut rng = StdRng::seed_from_u64(3);
        let raw = random_raw(&mut rng, 6, 8);
        let cfg = EfimConfig {
            min_utility: 1,
            max_len: Some(2),
            ..EfimConfig::default()
        };
        let got = result_set(mine(&raw, &cfg, None).unwrap());
        let expected: BTreeSet<_> = brute_force(&raw, 1)
            .into_iter()
            .filter(|(items, _)| items.len() <= 2)
            .collect();
        assert_eq!(got, expected);

        let none = mine(
            &raw,
            &EfimConfig {
                min_utility: 1,
                max_len: Some(0),
                ..EfimConfig::default()
            },
            None,
        )
        .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn rejects_negative_threshold_before_mining() {
        match mine(&Vec::new(), &cfg(-1), None) {
            Err(MineError::InvalidMinUtility(-1)) => {}
            other => panic!("expected InvalidMinUtility, got {:?}", other),
        }
    }

    #[test]
    fn rejects_negative_item_utilities() {
        let raw = vec![(vec![1, 2], vec![1, -4])];
        assert!(matches!(
            mine(&raw, &cfg(0), None),
            Err(MineError::NegativeUtility { item: 2, value: -4 })
        ));
    }

    #[test]
    fn cancellation_stops_emission() {
        let mut rng = StdRng::seed_from_u64(11);
        let raw = random_raw(&mut rng, 6, 8);
        let flag = AtomicBool::new(true);
        assert!(mine(&raw, &cfg(1), Some(&flag)).unwrap().is_empty());
    }

    #[test]
    fn streams_patterns_through_a_line_sink() {
        let raw = vec![(vec![1, 2], vec![1, 2]), (vec![1, 3], vec![1, 5])];
        let mut buf = Vec::new();
        let mut sink = LineSink::new(&mut buf);
        mine_to_sink(&raw, &cfg(3), None, &mut sink).unwrap();
        assert_eq!(sink.finish().unwrap(), 3);
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().all(|l| l.contains(" #UTIL: ")));
        assert!(text.contains("3 #UTIL: 5"));
    }

    fn raw_strategy() -> impl Strategy<Value = Raw> {
        prop::collection::vec(
            prop::collection::btree_map(1i64..8, 0i64..10, 1..5).prop_map(|m| {
                (
                    m.keys().copied().collect::<Vec<i64>>(),
                    m.values().copied().collect::<Vec<i64>>(),
                )
            }),
            0..8,
        )
    }

    proptest! {
        /// The root bounds must dominate the true utility of every
        /// supported itemset: the local bound for any member item, the
        /// subtree bound for the lowest-ranked member.
        #[test]
        fn root_bounds_dominate_true_utilities(raw in raw_strategy()) {
            let dataset = Dataset::build(&raw, 0, false).unwrap();
            let mut bins = UtilityBins::new(dataset.n_items());
            dataset.seed_bins(&mut bins);
            let rank_of = |id: i64| -> u32 {
                dataset
                    .rank_to_item
                    .iter()
                    .position(|&x| x == id)
                    .unwrap() as u32
            };
            for (set, utility) in brute_force(&raw, 0) {
                let ranks: Vec<u32> = set.iter().map(|&id| rank_of(id)).collect();
                for &r in &ranks {
                    prop_assert!(bins.local(r) >= utility);
                }
                let lowest = *ranks.iter().min().unwrap();
                prop_assert!(bins.subtree(lowest) >= utility);
            }
        }

        /// Mining at a random threshold agrees with brute force.
        #[test]
        fn mining_matches_brute_force(raw in raw_strategy(), min_utility in 1i64..40) {
            let expected = brute_force(&raw, min_utility);
            let got = result_set(mine(&raw, &cfg(min_utility), None).unwrap());
            prop_assert_eq!(got, expected);
        }
    }
}
