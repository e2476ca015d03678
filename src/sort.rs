//! Stable reordering of shells into contiguous `(l, nprim)` groups.

use crate::prelude::*;
use crate::shell::{make_ao_loc, Shell};
use itertools::Itertools;

/// Contiguous shell groups of a sorted basis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellGroups {
    /// `(l, nprim)` of each group.
    pub l_ctr: Vec<[usize; 2]>,
    /// Shell offsets, `len() + 1` entries, starting at 0 and ending at nbas.
    pub offsets: Vec<usize>,
}

impl ShellGroups {
    pub fn len(&self) -> usize {
        self.l_ctr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.l_ctr.is_empty()
    }

    pub fn l(&self, g: usize) -> usize {
        self.l_ctr[g][0]
    }

    pub fn range(&self, g: usize) -> std::ops::Range<usize> {
        self.offsets[g]..self.offsets[g + 1]
    }

    pub fn count(&self, g: usize) -> usize {
        self.offsets[g + 1] - self.offsets[g]
    }

    /// Check the offset array against the shells it is supposed to describe.
    pub fn validate(&self, shells: &[Shell]) -> GvhfResult<()> {
        if self.offsets.len() != self.l_ctr.len() + 1 || self.offsets.first() != Some(&0) {
            return Err(GvhfError::config("group offsets must start at 0 with one entry per group plus one"));
        }
        if self.offsets.last() != Some(&shells.len()) {
            return Err(GvhfError::config(format!(
                "groups cover {:?} shells, basis has {}",
                self.offsets.last(),
                shells.len()
            )));
        }
        for g in 0..self.len() {
            if self.offsets[g + 1] <= self.offsets[g] {
                return Err(GvhfError::config(format!("group {g} is empty or offsets decrease")));
            }
            let [l, nprim] = self.l_ctr[g];
            if let Some(ish) = self.range(g).find(|&i| shells[i].l != l || shells[i].nprim != nprim) {
                return Err(GvhfError::config(format!("shell {ish} does not match group {g} (l={l}, nprim={nprim})")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SortedBasis {
    /// Working basis with `bas` rewritten in sorted order.
    pub cint: CInt,
    pub shells: Vec<Shell>,
    /// Sorted position -> working shell index.
    pub sorted_idx: Vec<usize>,
    /// Working shell index -> sorted position.
    pub inv_idx: Vec<usize>,
    pub groups: ShellGroups,
    /// Cartesian function offsets of the sorted shells.
    pub ao_loc: Vec<usize>,
    /// Sorted Cartesian function -> working Cartesian function.
    pub ao_idx: Vec<usize>,
}

impl SortedBasis {
    pub fn nbas(&self) -> usize {
        self.shells.len()
    }

    pub fn nao(&self) -> usize {
        *self.ao_loc.last().unwrap_or(&0)
    }
}

/// Sort the working shells by `(l, nprim)`, ties broken by working order.
pub fn sort_basis(cint: &CInt, shells: &[Shell]) -> SortedBasis {
    let mut sorted_idx: Vec<usize> = (0..shells.len()).collect();
    sorted_idx.sort_by_key(|&i| (shells[i].l, shells[i].nprim));

    let mut inv_idx = vec![0; shells.len()];
    sorted_idx.iter().enumerate().for_each(|(pos, &i)| inv_idx[i] = pos);

    let sorted_shells: Vec<Shell> = sorted_idx.iter().map(|&i| shells[i]).collect();

    let mut l_ctr = vec![];
    let mut offsets = vec![0];
    for (key, chunk) in &sorted_shells.iter().chunk_by(|s| (s.l, s.nprim)) {
        l_ctr.push([key.0, key.1]);
        offsets.push(offsets.last().unwrap_or(&0) + chunk.count());
    }

    let work_ao_loc = make_ao_loc(shells, true);
    let ao_idx: Vec<usize> = sorted_idx.iter().flat_map(|&i| work_ao_loc[i]..work_ao_loc[i + 1]).collect();

    let mut sorted_cint = cint.clone();
    sorted_cint.bas = sorted_shells.iter().map(Shell::to_bas).collect();

    SortedBasis {
        cint: sorted_cint,
        ao_loc: make_ao_loc(&sorted_shells, true),
        shells: sorted_shells,
        sorted_idx,
        inv_idx,
        groups: ShellGroups { l_ctr, offsets },
        ao_idx,
    }
}
