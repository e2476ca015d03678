//! Evaluation path for shells beyond the accelerator's angular-momentum limit.

use crate::host::{contract_jk, eval_quartet, fill_blocks, ShellTiles};
use crate::prelude::*;
use crate::shell::PTR_RANGE_OMEGA;
use std::ops::Range;

/// Evaluator for the work the accelerator is not allowed to see.
///
/// Results use the same conventions as the accelerator: J/K contributions are added to the
/// pre-symmetrization accumulators, fills write into global-index blocks.
pub trait FallbackEvaluator: Send + Sync {
    fn name(&self) -> &str;

    /// Add every unique quartet of the orbital shells of `desc` having at least one shell outside
    /// `exclude`.
    fn jk(
        &self,
        desc: &BasisProdDesc,
        exclude: Range<usize>,
        dms: DenseView<'_>,
        vj: Option<&mut [f64]>,
        vk: Option<&mut [f64]>,
        omega: f64,
    ) -> GvhfResult<()>;

    fn fill(&self, desc: &BasisProdDesc, launch: FillLaunch<'_>) -> GvhfResult<()>;
}

/// libcint on the host, quartet by quartet without screening.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostFallback;

impl FallbackEvaluator for HostFallback {
    fn name(&self) -> &str {
        "host fallback"
    }

    fn jk(
        &self,
        desc: &BasisProdDesc,
        exclude: Range<usize>,
        dms: DenseView<'_>,
        mut vj: Option<&mut [f64]>,
        mut vk: Option<&mut [f64]>,
        omega: f64,
    ) -> GvhfResult<()> {
        let nbas = desc.nbas_orb;
        if exclude.start == 0 && exclude.end >= nbas {
            return Ok(());
        }
        let [n_dm, nao, _] = dms.shape();
        if nao != desc.ao_loc[nbas] {
            return Err(GvhfError::shape("fallback density", &[n_dm, desc.ao_loc[nbas], desc.ao_loc[nbas]], &dms.shape()));
        }
        let time = std::time::Instant::now();

        let mut cint = desc.tot.clone();
        cint.env[PTR_RANGE_OMEGA] = omega;
        let cint = &cint;

        let pairs: Vec<[usize; 2]> = (0..nbas).flat_map(|i| (0..=i).map(move |j| [i, j])).collect();
        let outside = |x: usize| !exclude.contains(&x);
        let with_j = vj.is_some();
        let with_k = vk.is_some();

        let bra: Vec<usize> = (0..pairs.len()).collect();
        let chunk = bra.len().div_ceil(rayon::current_num_threads().max(1)).max(1);
        let partials: Vec<(Option<ShellTiles>, Option<ShellTiles>, usize)> = bra
            .par_chunks(chunk)
            .map(|chunk| {
                let mut xj = with_j.then(|| ShellTiles::new(&desc.ao_loc, n_dm));
                let mut xk = with_k.then(|| ShellTiles::new(&desc.ao_loc, n_dm));
                let mut count = 0;
                for &a in chunk {
                    let [i, j] = pairs[a];
                    for (b, &[k, l]) in pairs[..=a].iter().enumerate() {
                        if ![i, j, k, l].into_iter().any(outside) {
                            continue;
                        }
                        let pw_ij = if i == j { 0.5 } else { 1.0 };
                        let pw_kl = if k == l { 0.5 } else { 1.0 };
                        let fac = pw_ij * pw_kl * if a == b { 0.5 } else { 1.0 };
                        let eri = eval_quartet(cint, [i, j, k, l]);
                        contract_jk(&eri, [i, j, k, l], fac, &dms, xj.as_mut(), xk.as_mut());
                        count += 1;
                    }
                }
                (xj, xk, count)
            })
            .collect();

        let mut count = 0;
        for (xj, xk, n) in partials {
            for (out, x) in [(vj.as_deref_mut(), xj), (vk.as_deref_mut(), xk)] {
                if let (Some(out), Some(x)) = (out, x) {
                    if !x.scatter(out, nao) {
                        return Err(GvhfError::shape("fallback accumulator", &[n_dm, nao, nao], &[out.len()]));
                    }
                }
            }
            count += n;
        }
        log::debug!("{}: {count} quartets with shells outside {exclude:?}, {:.2?}", self.name(), time.elapsed());
        Ok(())
    }

    fn fill(&self, desc: &BasisProdDesc, launch: FillLaunch<'_>) -> GvhfResult<()> {
        let FillLaunch { class, mut out, cp_ij, cp_aux, omega } = launch;
        fill_blocks(desc, class, cp_ij, cp_aux, &mut out, omega).map_err(|status| GvhfError::Kernel {
            class,
            label: crate::dispatch::fill_label(desc, cp_ij, cp_aux),
            cp_ij,
            cp_kl: cp_aux,
            status,
        })
    }
}
