use crate::prelude::*;
use crate::shell::ncart;

/// Split groups so that `count * ncart(l) <= group_size`; groups above `lmax` stay whole.
pub fn split_groups(groups: &ShellGroups, group_size: usize, lmax: usize) -> ShellGroups {
    let mut l_ctr = vec![];
    let mut offsets = vec![0];
    for g in 0..groups.len() {
        let l = groups.l(g);
        let count = groups.count(g);
        let max_shells = if l > lmax { count } else { (group_size / ncart(l)).max(1) };
        let mut start = groups.offsets[g];
        while start < groups.offsets[g + 1] {
            let end = (start + max_shells).min(groups.offsets[g + 1]);
            l_ctr.push(groups.l_ctr[g]);
            offsets.push(end);
            start = end;
        }
    }
    ShellGroups { l_ctr, offsets }
}
