//! Dispatch loops: enumerate group pairs, apply the angular-momentum and density gates, launch
//! the accelerator and fold its results into sorted-basis accumulators.

use crate::prelude::*;
use crate::shell::ANG_OF;
use crate::util::vec_to_tsr;

fn group_l(desc: &BasisProdDesc, cp: usize) -> [usize; 2] {
    let l = |s: usize| desc.tot.bas[s][ANG_OF] as usize;
    match desc.pairs(cp).and_then(|p| p.first()) {
        Some(&[i, j]) => [l(i), l(j)],
        None => [0, 0],
    }
}

/// Angular momentum label of a fill launch, e.g. `(sd|p)`.
pub(crate) fn fill_label(desc: &BasisProdDesc, cp_ij: usize, cp_aux: usize) -> String {
    let [li, lj] = group_l(desc, cp_ij);
    let [lk, _] = group_l(desc, cp_aux);
    match desc.kinds.get(cp_ij) {
        Some(GroupPairKind::Auxiliary { .. }) => KernelClass::label(&[li, lk]),
        _ => KernelClass::label(&[li, lj, lk]),
    }
}

/* #region J/K */

/// Inputs of one J/K evaluation over the sorted working basis.
#[derive(Debug)]
pub(crate) struct JkRequest<'a> {
    /// Densities in the sorted Cartesian basis, `(n_dm, nao, nao)`.
    pub dms: DenseView<'a>,
    pub with_j: bool,
    pub with_k: bool,
    pub omega: f64,
    pub cutoff: f64,
    pub direct_scf_tol: f64,
}

/// Pre-symmetrization J/K accumulators, `(n_dm, nao, nao)` each.
pub(crate) type JkAccumulators = (Option<Vec<f64>>, Option<Vec<f64>>);

/// Work done by one J/K dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JkStats {
    /// Bin-pair launches handed to the accelerator.
    pub launches: usize,
    /// Group-pair pairs dropped by the direct-SCF density gate.
    pub gated: usize,
}

/// `log max |D|` per shell pair and `max |D|` per group pair, both over all densities.
pub(crate) fn condense_density(dms: &DenseView, ao_loc: &[usize], groups: &ShellGroups) -> (Vec<f64>, Vec<f64>) {
    let nbas = ao_loc.len() - 1;
    let [n_dm, _, _] = dms.shape();
    let mut dm_shl = vec![0.0_f64; nbas * nbas];
    for i in 0..nbas {
        for j in 0..nbas {
            let mut v = 0.0_f64;
            for d in 0..n_dm {
                for a in ao_loc[i]..ao_loc[i + 1] {
                    for b in ao_loc[j]..ao_loc[j + 1] {
                        v = v.max(dms.get(d, a, b).abs());
                    }
                }
            }
            dm_shl[i * nbas + j] = v;
        }
    }

    let ng = groups.len();
    let mut dm_grp = vec![0.0_f64; ng * ng];
    for p in 0..ng {
        for q in 0..ng {
            dm_grp[p * ng + q] =
                groups.range(p).flat_map(|i| groups.range(q).map(move |j| (i, j))).fold(0.0, |acc, (i, j)| acc.max(dm_shl[i * nbas + j]));
        }
    }
    let dm_shl_log = dm_shl.iter().map(|x| x.ln()).collect();
    (dm_shl_log, dm_grp)
}

/// Run every bin pair of every admissible group-pair pair `cp_kl <= cp_ij` on the accelerator.
///
/// `bins` lists the orbital group pairs in cache order; groups whose shells exceed the kernel
/// limit are never part of it and are left to the fallback.
pub(crate) fn jk_dispatch<A: Accelerator>(
    cache: &BasisProdCache<A>,
    bins: &[GroupPairBins],
    groups: &ShellGroups,
    req: &JkRequest,
) -> GvhfResult<(JkAccumulators, JkStats)> {
    let time = std::time::Instant::now();
    let desc = cache.desc();
    let accel = cache.accelerator();
    let [n_dm, nao, _] = req.dms.shape();
    let shape = [n_dm, nao, nao];
    let len = n_dm * nao * nao;
    let mut vj = req.with_j.then(|| vec![0.0; len]);
    let mut vk = req.with_k.then(|| vec![0.0; len]);
    let mut stats = JkStats::default();
    if !req.with_j && !req.with_k {
        return Ok(((vj, vk), stats));
    }

    let (dm_shl_log, dm_grp) = condense_density(&req.dms, &desc.ao_loc[..=desc.nbas_orb], groups);
    let ng = groups.len();
    let dm_cond = |p: usize, q: usize| dm_grp[p * ng + q];
    let lmax = accel.lmax(KernelClass::Jk);
    let log_cutoff = req.cutoff.ln();
    let dm_tol = req.direct_scf_tol / n_dm as f64;

    for cp_ij in 0..bins.len() {
        let [gi, gj] = bins[cp_ij].groups;
        if groups.l(gi) > lmax || groups.l(gj) > lmax {
            continue;
        }
        for cp_kl in 0..=cp_ij {
            let [gk, gl] = bins[cp_kl].groups;
            if groups.l(gk) > lmax || groups.l(gl) > lmax {
                continue;
            }
            let sub_dm_cond = [dm_cond(gi, gj), dm_cond(gk, gl), dm_cond(gi, gk), dm_cond(gi, gl), dm_cond(gj, gk), dm_cond(gj, gl)]
                .into_iter()
                .fold(0.0, f64::max);
            let q_cond = bins[cp_ij].max_q * bins[cp_kl].max_q;
            if sub_dm_cond * q_cond < dm_tol {
                stats.gated += 1;
                continue;
            }
            let log_dm_cond = sub_dm_cond.ln();

            for b_ij in 0..bins[cp_ij].nbins() {
                for b_kl in 0..bins[cp_kl].nbins() {
                    let launch = JkLaunch {
                        vj: vj.as_deref_mut().map(|v| DenseViewMut::new(v, shape)).transpose()?,
                        vk: vk.as_deref_mut().map(|v| DenseViewMut::new(v, shape)).transpose()?,
                        dms: req.dms,
                        dm_shl_log: &dm_shl_log,
                        cp_ij,
                        cp_kl,
                        bin_ij: bins[cp_ij].bin(b_ij),
                        bin_kl: bins[cp_kl].bin(b_kl),
                        log_dm_cond,
                        log_cutoff,
                        omega: req.omega,
                    };
                    let status = accel.build_jk(cache.resident(), launch);
                    if status != 0 {
                        let label = KernelClass::label(&[groups.l(gi), groups.l(gj), groups.l(gk), groups.l(gl)]);
                        log::error!("{} J/K kernel {label} failed for group pairs ({cp_ij}, {cp_kl})", accel.name());
                        return Err(GvhfError::Kernel { class: KernelClass::Jk, label, cp_ij, cp_kl, status });
                    }
                    stats.launches += 1;
                }
            }
        }
    }
    log::debug!(
        "J/K on {}: {} bin-pair launches, {} group-pair pairs below the density gate, {:.2?}",
        accel.name(),
        stats.launches,
        stats.gated,
        time.elapsed()
    );
    Ok(((vj, vk), stats))
}

/* #endregion */

/* #region fills */

/// Number of orbital group pairs at the front of the cache.
pub(crate) fn n_orbital_pairs(desc: &BasisProdDesc) -> usize {
    desc.kinds.iter().take_while(|k| matches!(k, GroupPairKind::Orbital { .. })).count()
}

fn launch_fill<A: Accelerator>(
    cache: &BasisProdCache<A>,
    fallback: &dyn FallbackEvaluator,
    launch: FillLaunch<'_>,
    lmax_needed: usize,
) -> GvhfResult<()> {
    let accel = cache.accelerator();
    let desc = cache.desc();
    let (class, cp_ij, cp_aux) = (launch.class, launch.cp_ij, launch.cp_aux);
    if lmax_needed > accel.lmax(class) {
        return fallback.fill(desc, launch);
    }
    let status = accel.fill(cache.resident(), launch);
    if status != 0 {
        let label = fill_label(desc, cp_ij, cp_aux);
        log::error!("{} {} kernel {label} failed for group pairs ({cp_ij}, {cp_aux})", accel.name(), class.intor());
        return Err(GvhfError::Kernel { class, label, cp_ij, cp_kl: cp_aux, status });
    }
    Ok(())
}

/// Three-center block of one auxiliary group over all orbital functions, sorted Cartesian order,
/// shape `(comp, nk, nao, nao)`.
///
/// With `aosym` and an orbital-symmetric class, blocks computed for one orientation are mirrored
/// into the other so every `(k, i, j)` element is present exactly once per orientation.
pub(crate) fn fill_aux_group<A: Accelerator>(
    cache: &BasisProdCache<A>,
    fallback: &dyn FallbackEvaluator,
    class: KernelClass,
    orb_groups: &ShellGroups,
    aux_groups: &ShellGroups,
    ga: usize,
    omega: f64,
) -> GvhfResult<(std::ops::Range<usize>, Vec<f64>)> {
    let desc = cache.desc();
    let n_orb_cp = n_orbital_pairs(desc);
    let cp_aux = n_orb_cp + ga;
    let ao_loc = &desc.ao_loc;
    let nbas_orb = desc.nbas_orb;
    let nao = ao_loc[nbas_orb];
    let comp = class.ncomp();

    let aux_shells = aux_groups.range(ga);
    let (k0, k1) = (ao_loc[aux_shells.start + nbas_orb], ao_loc[aux_shells.end + nbas_orb]);
    let nk = k1 - k0;
    let l_aux = aux_groups.l(ga);
    let mirror = desc.aosym && class.orbital_symmetric();

    let mut out = vec![0.0; comp * nk * nao * nao];
    for cp in 0..n_orb_cp {
        let GroupPairKind::Orbital { groups: [p, q], diag } = desc.kinds[cp] else {
            continue;
        };
        let (ip, iq) = (orb_groups.range(p), orb_groups.range(q));
        let (i0, i1) = (ao_loc[ip.start], ao_loc[ip.end]);
        let (j0, j1) = (ao_loc[iq.start], ao_loc[iq.end]);
        let (ni, nj) = (i1 - i0, j1 - j0);

        let mut blk = vec![0.0; comp * nk * ni * nj];
        let view = BlockViewMut::new(&mut blk, [comp, nk, ni, nj], [k0, i0, j0])?;
        let launch = FillLaunch { class, out: view, cp_ij: cp, cp_aux, omega };
        let lmax_needed = orb_groups.l(p).max(orb_groups.l(q)).max(l_aux);
        launch_fill(cache, fallback, launch, lmax_needed)?;

        let mirror_diag = mirror && diag && !desc.diag_block_with_triu;
        for c in 0..comp {
            for k in 0..nk {
                let base = (c * nk + k) * nao * nao;
                for a in 0..ni {
                    for b in 0..nj {
                        let v = blk[((c * nk + k) * ni + a) * nj + b];
                        let (i, j) = (i0 + a, j0 + b);
                        if mirror_diag && a < b {
                            continue;
                        }
                        out[base + i * nao + j] = v;
                        if mirror && (!diag || mirror_diag) {
                            out[base + j * nao + i] = v;
                        }
                    }
                }
            }
        }
    }
    Ok((k0 - nao..k1 - nao, out))
}

/// Two-center metric, or its derivative for [`KernelClass::Int2c2eIp1`], over the sorted Cartesian
/// auxiliary functions, `(comp, naux, naux)`.
pub(crate) fn fill_int2c2e<A: Accelerator>(
    cache: &BasisProdCache<A>,
    fallback: &dyn FallbackEvaluator,
    class: KernelClass,
    aux_groups: &ShellGroups,
    omega: f64,
) -> GvhfResult<Tsr> {
    let desc = cache.desc();
    let n_orb_cp = n_orbital_pairs(desc);
    let nbas_orb = desc.nbas_orb;
    let ao_loc = &desc.ao_loc;
    let nao = ao_loc[nbas_orb];
    let naux = ao_loc[ao_loc.len() - 1] - nao;
    let comp = class.ncomp();
    let range = |g: usize| {
        let r = aux_groups.range(g);
        ao_loc[r.start + nbas_orb] - nao..ao_loc[r.end + nbas_orb] - nao
    };

    let mut out: Tsr = rt::zeros(([comp, naux, naux], &DeviceTsr::default()));
    for ga in 0..aux_groups.len() {
        let ra = range(ga);
        for gb in 0..aux_groups.len() {
            let rb = range(gb);
            let (na, nb) = (ra.len(), rb.len());
            let mut blk = vec![0.0; comp * na * nb];
            // the kernel writes (comp, b, a)
            let view = BlockViewMut::new(&mut blk, [comp, nb, na, 1], [rb.start + nao, ra.start + nao, 0])?;
            let launch = FillLaunch { class, out: view, cp_ij: n_orb_cp + ga, cp_aux: n_orb_cp + gb, omega };
            launch_fill(cache, fallback, launch, aux_groups.l(ga).max(aux_groups.l(gb)))?;
            let blk = vec_to_tsr(blk, &[comp, nb, na]);
            out.i_mut((.., ra.clone(), rb)).assign(blk.swapaxes(1, 2));
        }
    }
    Ok(out)
}

/* #endregion */
