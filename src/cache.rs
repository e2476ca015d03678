//! Batch-product cache: the immutable, accelerator-resident description of all shell pairs.

use crate::prelude::*;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupPairKind {
    /// Orbital group pair; `diag` when both groups coincide.
    Orbital { groups: [usize; 2], diag: bool },
    /// One auxiliary group; its "pairs" are `(k, k)` entries.
    Auxiliary { group: usize },
}

/// Host-side packing of the cache before it is handed to the accelerator.
#[derive(Debug, Clone)]
pub struct BasisProdDesc {
    /// Sorted orbital basis, followed by the sorted auxiliary basis if any. Cartesian.
    pub tot: CInt,
    /// Cartesian function offsets over all shells of `tot`.
    pub ao_loc: Vec<usize>,
    pub nbas_orb: usize,
    pub pair2shls: Vec<[usize; 2]>,
    pub pair_log_q: Vec<f64>,
    /// Pair offsets per group pair, `kinds.len() + 1` entries.
    pub pair_locs: Vec<usize>,
    pub kinds: Vec<GroupPairKind>,
    pub aosym: bool,
    pub diag_block_with_triu: bool,
}

impl BasisProdDesc {
    /// Concatenate orbital group pairs and, for three-center work, the auxiliary groups.
    pub fn new(
        orb: &SortedBasis,
        orb_pairs: &[GroupPairBins],
        aux: Option<(&SortedBasis, &ShellGroups)>,
        policy: PairingPolicy,
    ) -> Self {
        let nbas_orb = orb.nbas();
        let mut tot = orb.cint.clone();
        let mut ao_loc = orb.ao_loc.clone();

        let mut pair2shls = vec![];
        let mut pair_log_q = vec![];
        let mut pair_locs = vec![0];
        let mut kinds = vec![];
        for gp in orb_pairs {
            pair2shls.extend_from_slice(&gp.pairs);
            pair_log_q.extend_from_slice(&gp.log_q);
            pair_locs.push(pair2shls.len());
            kinds.push(GroupPairKind::Orbital { groups: gp.groups, diag: gp.is_diag() });
        }

        if let Some((aux_sorted, aux_groups)) = aux {
            tot = crate::shell::conc_cint(&tot, &aux_sorted.cint);
            let nao_orb = orb.nao();
            ao_loc.extend(aux_sorted.ao_loc.iter().skip(1).map(|x| x + nao_orb));
            for g in 0..aux_groups.len() {
                pair2shls.extend(aux_groups.range(g).map(|k| [k + nbas_orb, k + nbas_orb]));
                pair_log_q.extend(aux_groups.range(g).map(|_| 0.0));
                pair_locs.push(pair2shls.len());
                kinds.push(GroupPairKind::Auxiliary { group: g });
            }
        }

        BasisProdDesc {
            tot,
            ao_loc,
            nbas_orb,
            pair2shls,
            pair_log_q,
            pair_locs,
            kinds,
            aosym: policy.aosym,
            diag_block_with_triu: policy.diag_block_with_triu,
        }
    }

    pub fn n_group_pairs(&self) -> usize {
        self.kinds.len()
    }

    pub fn pairs(&self, cp: usize) -> Option<&[[usize; 2]]> {
        let (start, end) = (*self.pair_locs.get(cp)?, *self.pair_locs.get(cp + 1)?);
        self.pair2shls.get(start..end)
    }

    pub fn log_q(&self, cp: usize) -> Option<&[f64]> {
        let (start, end) = (*self.pair_locs.get(cp)?, *self.pair_locs.get(cp + 1)?);
        self.pair_log_q.get(start..end)
    }

    /// Bytes the cache occupies once resident.
    pub fn nbytes(&self) -> usize {
        let ints = self.tot.atm.len() * 6 + self.tot.bas.len() * 8;
        let words = self.tot.env.len() + self.pair_log_q.len();
        let indices = self.ao_loc.len() + 2 * self.pair2shls.len() + self.pair_locs.len();
        ints * 4 + words * 8 + indices * 8
    }
}

/// Owner of an accelerator-resident batch cache.
///
/// The resident copy is released exactly once, either by [`BasisProdCache::release`] or when
/// the handle goes out of scope.
pub struct BasisProdCache<A: Accelerator> {
    accel: Arc<A>,
    resident: A::Resident,
    desc: BasisProdDesc,
}

impl<A: Accelerator> BasisProdCache<A> {
    pub fn build(accel: Arc<A>, desc: BasisProdDesc) -> GvhfResult<Self> {
        let time = std::time::Instant::now();
        let resident = accel.init_basis_prod(&desc)?;
        log::debug!(
            "batch cache on {}: {} group pairs, {} shell pairs, {} bytes, {:.2?}",
            accel.name(),
            desc.n_group_pairs(),
            desc.pair2shls.len(),
            desc.nbytes(),
            time.elapsed()
        );
        Ok(Self { accel, resident, desc })
    }

    pub fn resident(&self) -> &A::Resident {
        &self.resident
    }

    pub fn desc(&self) -> &BasisProdDesc {
        &self.desc
    }

    pub fn accelerator(&self) -> &A {
        &self.accel
    }

    /// Release the resident copy now.
    pub fn release(self) {
        drop(self)
    }
}

impl<A: Accelerator> Drop for BasisProdCache<A> {
    fn drop(&mut self) {
        self.accel.release_basis_prod(&mut self.resident);
    }
}

impl<A: Accelerator> std::fmt::Debug for BasisProdCache<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasisProdCache")
            .field("accelerator", &self.accel.name())
            .field("group_pairs", &self.desc.n_group_pairs())
            .field("shell_pairs", &self.desc.pair2shls.len())
            .finish()
    }
}
