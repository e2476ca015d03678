//! Schwarz screening of shell pairs and magnitude binning per group pair.

use crate::prelude::*;
use crate::shell::Shell;

/// `q[i, j] = sqrt(max |(ij|ij)|)` over the sorted working shells.
#[derive(Debug, Clone)]
pub struct SchwarzTable {
    nbas: usize,
    q: Vec<f64>,
}

impl SchwarzTable {
    /// Evaluate the diagonal shell-quartet integrals of a Cartesian basis.
    pub fn build(cint: &CInt, shells: &[Shell]) -> Self {
        let time = std::time::Instant::now();
        let nbas = shells.len();
        let tril: Vec<(usize, usize)> = (0..nbas).flat_map(|i| (0..=i).map(move |j| (i, j))).collect();
        let values: Vec<f64> = tril
            .par_iter()
            .map(|&(i, j)| {
                let shls = [[i, i + 1], [j, j + 1], [i, i + 1], [j, j + 1]];
                let (out, _) = cint.integrate_row_major("int2e", None, shls).into();
                out.iter().fold(0.0_f64, |acc, x| acc.max(x.abs())).sqrt()
            })
            .collect();

        let mut q = vec![0.0; nbas * nbas];
        for (&(i, j), &v) in tril.iter().zip(&values) {
            q[i * nbas + j] = v;
            q[j * nbas + i] = v;
        }
        log::debug!("Schwarz table for {nbas} shells: {:.2?}", time.elapsed());
        SchwarzTable { nbas, q }
    }

    pub fn nbas(&self) -> usize {
        self.nbas
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.q[i * self.nbas + j]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingPolicy {
    /// Operator symmetric under bra-ket function exchange; only `P >= Q` group pairs are built.
    pub aosym: bool,
    /// Retain `i < j` pairs of diagonal blocks under `aosym`.
    pub diag_block_with_triu: bool,
}

/// Surviving shell pairs of one group pair, sorted by descending estimate and binned.
#[derive(Debug, Clone)]
pub struct GroupPairBins {
    pub groups: [usize; 2],
    /// Sorted-basis shell indices `(bra in groups[0], ket in groups[1])`.
    pub pairs: Vec<[usize; 2]>,
    /// `log q`, clipped to `<= 0`, non-increasing.
    pub log_q: Vec<f64>,
    /// Half-open pair ranges of the bins, `nbins + 1` entries.
    pub bins_locs: Vec<usize>,
    /// Upper bound of `log q` inside each bin.
    pub bins_floor: Vec<f64>,
    /// Largest unclipped `q` of the block, 0 when empty.
    pub max_q: f64,
}

impl GroupPairBins {
    pub fn is_diag(&self) -> bool {
        self.groups[0] == self.groups[1]
    }

    pub fn nbins(&self) -> usize {
        self.bins_floor.len()
    }

    pub fn bin(&self, b: usize) -> BinRange {
        BinRange { start: self.bins_locs[b], end: self.bins_locs[b + 1], floor: self.bins_floor[b] }
    }

}

/// Quantize a non-increasing list of log estimates into `ceil(n / bin_size)` bins.
///
/// Returns `(bins_locs, bins_floor)`. A pair in bin `b` satisfies
/// `bins_floor[b + 1] < log_q <= bins_floor[b]`.
pub fn make_bins(log_q: &[f64], bin_size: usize, cutoff: f64) -> (Vec<usize>, Vec<f64>) {
    let n = log_q.len();
    if n == 0 {
        return (vec![0], vec![]);
    }
    let nbins = n.div_ceil(bin_size);
    let scale = nbins as f64 / cutoff.min(0.1).ln();

    let mut counts = vec![0; nbins];
    for &lq in log_q {
        let s = (scale * lq).floor().max(0.0) as usize;
        counts[s.min(nbins - 1)] += 1;
    }
    let mut bins_locs = Vec::with_capacity(nbins + 1);
    bins_locs.push(0);
    for c in counts {
        bins_locs.push(bins_locs.last().unwrap_or(&0) + c);
    }
    let bins_floor = (0..nbins).map(|b| b as f64 / scale).collect();
    (bins_locs, bins_floor)
}

/// Screen and bin every group pair of the groups accepted by `include`.
pub fn make_group_pairs(
    q: &SchwarzTable,
    groups: &ShellGroups,
    include: impl Fn(usize) -> bool,
    cutoff: f64,
    bin_size: usize,
    policy: PairingPolicy,
) -> Vec<GroupPairBins> {
    let ng = groups.len();
    let group_pairs: Vec<[usize; 2]> = if policy.aosym {
        (0..ng).flat_map(|p| (0..=p).map(move |q| [p, q])).collect()
    } else {
        (0..ng).flat_map(|p| (0..ng).map(move |q| [p, q])).collect()
    };

    group_pairs
        .into_iter()
        .filter(|&[p, q]| include(p) && include(q))
        .map(|[p, qg]| {
            let tril_only = policy.aosym && !policy.diag_block_with_triu && p == qg;
            let mut cands: Vec<([usize; 2], f64)> = groups
                .range(p)
                .flat_map(|i| groups.range(qg).filter(move |&j| !tril_only || i >= j).map(move |j| [i, j]))
                .map(|[i, j]| ([i, j], q.get(i, j)))
                .filter(|&(_, v)| v > cutoff)
                .collect();
            // stable: ties keep shell order
            cands.sort_by(|a, b| b.1.total_cmp(&a.1));

            let pairs: Vec<[usize; 2]> = cands.iter().map(|c| c.0).collect();
            let log_q: Vec<f64> = cands.iter().map(|c| c.1.ln().min(0.0)).collect();
            let max_q = cands.first().map_or(0.0, |c| c.1);
            let (bins_locs, bins_floor) = make_bins(&log_q, bin_size, cutoff);
            GroupPairBins { groups: [p, qg], pairs, log_q, bins_locs, bins_floor, max_q }
        })
        .collect()
}
