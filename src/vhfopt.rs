//! Four-center Coulomb/exchange engine.

use crate::canonical::canonicalize;
use crate::dispatch::{jk_dispatch, JkRequest, JkStats};
use crate::partition::split_groups;
use crate::prelude::*;
use crate::screening::make_group_pairs;
use crate::sort::sort_basis;
use crate::unsort::{symmetrize, take_rows, to_original, to_working};
use crate::util::{tsr_to_vec, vec_to_tsr};
use std::sync::Arc;

/// Relative tolerance on `max |D - Dᵗ|` for a density to count as symmetric.
const SYMMETRY_TOL: f64 = 1e-10;

/// Coulomb and exchange matrices in the caller's basis, shaped like the input densities.
#[derive(Debug, Clone)]
pub struct JkResults {
    pub vj: Option<Tsr>,
    pub vk: Option<Tsr>,
    pub stats: JkStats,
}

/// Prepared basis, screening tables and resident batch cache for one orbital basis.
pub struct VhfOpt<A: Accelerator = HostAccelerator> {
    input: CInt,
    config: EngineConfig,
    templates: TemplateCache,
    canonical: CanonicalBasis,
    sorted: SortedBasis,
    /// Canonical transform rows in sorted order, `(nao_c, nao)`.
    t_s: Tsr,
    bins: Vec<GroupPairBins>,
    /// First sorted shell beyond the J/K kernel limit.
    h0: usize,
    accel: Arc<A>,
    fallback: Box<dyn FallbackEvaluator>,
    cache: Option<BasisProdCache<A>>,
}

impl VhfOpt<HostAccelerator> {
    pub fn new(cint: &CInt, config: EngineConfig) -> GvhfResult<Self> {
        Self::with_accelerator(cint, config, Arc::new(HostAccelerator::default()))
    }
}

impl<A: Accelerator> VhfOpt<A> {
    pub fn with_accelerator(cint: &CInt, config: EngineConfig, accel: Arc<A>) -> GvhfResult<Self> {
        config.check()?;
        let mut templates = TemplateCache::new();
        let canonical = canonicalize(cint, config.mode, &mut templates)?;
        let (sorted, bins, h0) = prepare(&canonical, &config, accel.lmax(KernelClass::Jk))?;
        let t_s = take_rows(canonical.transform.view(), &sorted.ao_idx);
        let mut opt = VhfOpt {
            input: cint.clone(),
            config,
            templates,
            canonical,
            sorted,
            t_s,
            bins,
            h0,
            accel,
            fallback: Box::new(HostFallback),
            cache: None,
        };
        opt.build_cache()?;
        Ok(opt)
    }

    pub fn with_fallback(mut self, fallback: impl FallbackEvaluator + 'static) -> Self {
        self.fallback = Box::new(fallback);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sorted(&self) -> &SortedBasis {
        &self.sorted
    }

    pub fn group_pairs(&self) -> &[GroupPairBins] {
        &self.bins
    }

    /// Number of sorted shells handled by the accelerator; the rest go to the fallback.
    pub fn n_accelerated_shells(&self) -> usize {
        self.h0
    }

    pub fn is_released(&self) -> bool {
        self.cache.is_none()
    }

    fn build_cache(&mut self) -> GvhfResult<()> {
        let policy = PairingPolicy { aosym: true, diag_block_with_triu: self.config.diag_block_with_triu };
        let desc = BasisProdDesc::new(&self.sorted, &self.bins, None, policy);
        self.cache = Some(BasisProdCache::build(self.accel.clone(), desc)?);
        log::info!(
            "J/K engine ready: {} shells ({} Cartesian functions) in {} groups, {} group pairs, {} shells on the fallback",
            self.sorted.nbas(),
            self.sorted.nao(),
            self.sorted.groups.len(),
            self.bins.len(),
            self.sorted.nbas() - self.h0,
        );
        Ok(())
    }

    /// Rebuild everything derived from the basis under a new configuration.
    ///
    /// The previous batch cache is released before the new one is allocated.
    pub fn rebuild(&mut self, config: EngineConfig) -> GvhfResult<()> {
        config.check()?;
        self.cache = None;
        if config.mode != self.config.mode {
            self.templates.clear();
        }
        self.canonical = canonicalize(&self.input, config.mode, &mut self.templates)?;
        let (sorted, bins, h0) = prepare(&self.canonical, &config, self.accel.lmax(KernelClass::Jk))?;
        self.t_s = take_rows(self.canonical.transform.view(), &sorted.ao_idx);
        (self.sorted, self.bins, self.h0) = (sorted, bins, h0);
        self.config = config;
        self.build_cache()
    }

    /// Release the accelerator-resident cache now. Later evaluations fail until [`Self::rebuild`].
    pub fn release(&mut self) {
        if let Some(cache) = self.cache.take() {
            cache.release();
        }
    }

    pub fn get_jk(&self, dms: &Tsr, with_j: bool, with_k: bool) -> GvhfResult<JkResults> {
        self.get_jk_omega(dms, with_j, with_k, self.config.omega)
    }

    /// J/K with the range-separated operator `erf(ω r) / r`; `omega = 0` is plain Coulomb.
    pub fn get_jk_omega(&self, dms: &Tsr, with_j: bool, with_k: bool, omega: f64) -> GvhfResult<JkResults> {
        let cache = self.cache.as_ref().ok_or_else(|| GvhfError::config("batch cache released; rebuild before use"))?;
        let nao = self.canonical.nao;
        let (n_dm, squeeze) = match dms.shape().as_slice() {
            [a, b] if *a == nao && *b == nao => (1, true),
            [n, a, b] if *a == nao && *b == nao => (*n, false),
            shape => return Err(GvhfError::shape("density", &[nao, nao], shape)),
        };
        let dms = dms.reshape([n_dm, nao, nao]);
        check_symmetric(dms.view())?;

        let time = std::time::Instant::now();
        let nao_c = self.sorted.nao();
        let dms_s = tsr_to_vec(to_working(dms.view(), &self.t_s).view());
        let dms_view = DenseView::new(&dms_s, [n_dm, nao_c, nao_c])?;

        let req = JkRequest {
            dms: dms_view,
            with_j,
            with_k,
            omega,
            cutoff: self.config.cutoff,
            direct_scf_tol: self.config.direct_scf_tol,
        };
        let ((mut vj, mut vk), stats) = jk_dispatch(cache, &self.bins, &self.sorted.groups, &req)?;

        if self.h0 < self.sorted.nbas() && (with_j || with_k) {
            self.fallback.jk(cache.desc(), 0..self.h0, dms_view, vj.as_deref_mut(), vk.as_deref_mut(), omega)?;
        }

        let finish = |x: Vec<f64>| {
            let x = symmetrize(&to_original(vec_to_tsr(x, &[n_dm, nao_c, nao_c]).view(), &self.t_s));
            if squeeze { x.into_shape([nao, nao]) } else { x }
        };
        let results = JkResults { vj: vj.map(finish), vk: vk.map(finish), stats };
        log::debug!("get_jk for {n_dm} densities: {:.2?}", time.elapsed());
        Ok(results)
    }
}

/// Sort, split and screen the working basis of `canonical`.
fn prepare(
    canonical: &CanonicalBasis,
    config: &EngineConfig,
    lmax: usize,
) -> GvhfResult<(SortedBasis, Vec<GroupPairBins>, usize)> {
    let mut sorted = sort_basis(&canonical.cint, &canonical.shells);
    sorted.groups = split_groups(&sorted.groups, config.group_size, lmax);
    sorted.groups.validate(&sorted.shells)?;

    let q = SchwarzTable::build(&sorted.cint, &sorted.shells);
    let groups = &sorted.groups;
    let policy = PairingPolicy { aosym: true, diag_block_with_triu: config.diag_block_with_triu };
    let bins = make_group_pairs(&q, groups, |g| groups.l(g) <= lmax, config.cutoff, config.bin_size, policy);
    let h0 = sorted.shells.iter().position(|s| s.l > lmax).unwrap_or(sorted.nbas());
    Ok((sorted, bins, h0))
}

fn check_symmetric(dms: TsrView) -> GvhfResult<()> {
    for d in 0..dms.shape()[0] {
        let dm = dms.i(d);
        let scale = dm.view().abs().max_all().max(1.0);
        let asym = (&dm - dm.t()).abs().max_all();
        if asym > SYMMETRY_TOL * scale {
            return Err(GvhfError::unsupported(format!(
                "density {d} is not symmetric (max |D - Dᵗ| = {asym:.3e}); only symmetric densities are supported"
            )));
        }
    }
    Ok(())
}

impl<A: Accelerator> std::fmt::Debug for VhfOpt<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VhfOpt")
            .field("accelerator", &self.accel.name())
            .field("fallback", &self.fallback.name())
            .field("nbas", &self.sorted.nbas())
            .field("group_pairs", &self.bins.len())
            .field("cache", &self.cache)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fixtures::*;
    use crate::host::STATUS_OUT_OF_BOUNDS;
    use crate::util::{intor_row_major, max_abs, max_abs_diff};
    use approx::assert_relative_eq;
    use std::sync::Mutex;

    /// J and K from the full `(ij|kl)` tensor of the caller's basis.
    fn reference_jk(cint: &CInt, dm: &Tsr) -> (Tsr, Tsr) {
        let nao = dm.shape()[0];
        let eri = intor_row_major(cint, "int2e").into_shape([nao, nao, nao, nao]);
        let vj = (&eri * dm).sum_axes([-1, -2]);
        let vk = (eri.swapaxes(1, 2) * dm).sum_axes([-1, -2]);
        (vj, vk)
    }

    #[test]
    fn test_two_s_atoms_reference() {
        let cint_data = two_s_atoms();
        let dm = symmetric_density(2, 1, 7);
        let opt = VhfOpt::new(&cint_data, EngineConfig::default()).unwrap();
        let res = opt.get_jk(&dm, true, true).unwrap();
        let (vj_ref, vk_ref) = reference_jk(&cint_data, &dm);
        let (vj, vk) = (res.vj.unwrap(), res.vk.unwrap());
        assert_eq!(vj.shape(), &[2, 2]);
        assert!(max_abs_diff(vj.view(), vj_ref.view()) < 1e-10);
        assert!(max_abs_diff(vk.view(), vk_ref.view()) < 1e-10);
    }

    #[test]
    fn test_two_s_atoms_unit_density() {
        let cint_data = two_s_atoms();
        let dm = vec_to_tsr(vec![1.0; 4], &[2, 2]);
        let opt = VhfOpt::new(&cint_data, EngineConfig::default()).unwrap();
        let res = opt.get_jk(&dm, true, true).unwrap();
        let (vj_ref, vk_ref) = reference_jk(&cint_data, &dm);
        for (v, v_ref) in [(res.vj.unwrap(), vj_ref), (res.vk.unwrap(), vk_ref)] {
            for i in 0..2 {
                for j in 0..2 {
                    assert_relative_eq!(v[[i, j]], v_ref[[i, j]], max_relative = 1e-10);
                }
            }
            assert_eq!(v[[0, 1]], v[[1, 0]]);
        }
    }

    #[test]
    fn test_general_contraction_both_modes() {
        for cart in [false, true] {
            let cint_data = general_contracted_pair(cart);
            let nao = cint_data.nao();
            let dm = symmetric_density(nao, 3, 11);
            let (vj_ref, vk_ref) = reference_jk(&cint_data, &dm);
            for mode in [ContractionMode::Replica, ContractionMode::Decontract] {
                let config = EngineConfig { mode, ..Default::default() };
                let opt = VhfOpt::new(&cint_data, config).unwrap();
                let res = opt.get_jk(&dm, true, true).unwrap();
                assert!(max_abs_diff(res.vj.unwrap().view(), vj_ref.view()) < 1e-9);
                assert!(max_abs_diff(res.vk.unwrap().view(), vk_ref.view()) < 1e-9);
            }
        }
    }

    #[test]
    fn test_large_cutoff_gives_zero() {
        let shells = [ShellSpec::primitive(0, 0, 0.3), ShellSpec::primitive(1, 0, 0.2), ShellSpec::primitive(1, 1, 0.25)];
        let cint_data = build_cint(&[[0.0, 0.0, 0.0], [0.0, 0.0, 1.4]], &[1, 1], &shells, false);
        let dm = symmetric_density(cint_data.nao(), 2, 3);
        let config = EngineConfig { cutoff: 1.0, ..Default::default() };
        let opt = VhfOpt::new(&cint_data, config).unwrap();
        assert!(opt.group_pairs().iter().all(|gp| gp.pairs.is_empty()));
        let res = opt.get_jk(&dm, true, true).unwrap();
        assert_eq!(max_abs(res.vj.unwrap().view()), 0.0);
        assert_eq!(max_abs(res.vk.unwrap().view()), 0.0);
    }

    #[test]
    fn test_triu_policy_equivalence() {
        let cint_data = general_contracted_pair(false);
        let dm = symmetric_density(cint_data.nao(), 3, 5);
        let tril = VhfOpt::new(&cint_data, EngineConfig::default()).unwrap().get_jk(&dm, true, true).unwrap();
        let config = EngineConfig { diag_block_with_triu: true, ..Default::default() };
        let triu = VhfOpt::new(&cint_data, config).unwrap().get_jk(&dm, true, true).unwrap();
        assert!(max_abs_diff(tril.vj.unwrap().view(), triu.vj.unwrap().view()) < 1e-10);
        assert!(max_abs_diff(tril.vk.unwrap().view(), triu.vk.unwrap().view()) < 1e-10);
    }

    #[test]
    fn test_small_bins_and_groups() {
        let cint_data = general_contracted_pair(false);
        let dm = symmetric_density(cint_data.nao(), 3, 5);
        let reference = VhfOpt::new(&cint_data, EngineConfig::default()).unwrap().get_jk(&dm, true, true).unwrap();
        let config = EngineConfig { bin_size: 1, group_size: 3, ..Default::default() };
        let opt = VhfOpt::new(&cint_data, config).unwrap();
        assert!(opt.sorted().groups.len() > 3);
        let res = opt.get_jk(&dm, true, true).unwrap();
        assert!(max_abs_diff(res.vj.unwrap().view(), reference.vj.unwrap().view()) < 1e-10);
        assert!(max_abs_diff(res.vk.unwrap().view(), reference.vk.unwrap().view()) < 1e-10);
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let cint_data = general_contracted_pair(false);
        let dm = symmetric_density(cint_data.nao(), 2, 1);
        let accel = Arc::new(HostAccelerator::default());
        let mut opt = VhfOpt::with_accelerator(&cint_data, EngineConfig::default(), accel.clone()).unwrap();
        let first = opt.get_jk(&dm, true, true).unwrap();
        opt.rebuild(EngineConfig::default()).unwrap();
        assert_eq!(accel.live_caches(), 1);
        let second = opt.get_jk(&dm, true, true).unwrap();
        assert_eq!(tsr_to_vec(first.vj.unwrap().view()), tsr_to_vec(second.vj.unwrap().view()));
        assert_eq!(tsr_to_vec(first.vk.unwrap().view()), tsr_to_vec(second.vk.unwrap().view()));

        opt.release();
        assert!(opt.is_released());
        assert_eq!(accel.live_caches(), 0);
        assert!(opt.get_jk(&dm, true, false).is_err());
        opt.rebuild(EngineConfig { cutoff: 1e-10, ..Default::default() }).unwrap();
        assert_eq!(accel.live_caches(), 1);
    }

    #[test]
    fn test_symmetry_and_multi_density() {
        let cint_data = mixed_with_high_l(2);
        let nao = cint_data.nao();
        let dm0 = symmetric_density(nao, 2, 21);
        let dm1 = symmetric_density(nao, 4, 22);
        let mut data = tsr_to_vec(dm0.view());
        data.extend(tsr_to_vec(dm1.view()));
        let dms = vec_to_tsr(data, &[2, nao, nao]);

        let opt = VhfOpt::new(&cint_data, EngineConfig::default()).unwrap();
        let res = opt.get_jk(&dms, true, true).unwrap();
        let vk = res.vk.unwrap();
        assert_eq!(vk.shape(), &[2, nao, nao]);
        for d in 0..2 {
            let x = vk.i(d);
            assert!(max_abs_diff(x.view(), x.t()) < 1e-12);
        }
        let single = opt.get_jk(&dm1, true, true).unwrap();
        assert!(max_abs_diff(vk.i(1), single.vk.unwrap().view()) < 1e-12);
        assert!(max_abs_diff(res.vj.unwrap().i(1), single.vj.unwrap().view()) < 1e-12);
    }

    #[test]
    fn test_reject_nonsymmetric_density() {
        let cint_data = two_s_atoms();
        let opt = VhfOpt::new(&cint_data, EngineConfig::default()).unwrap();
        let dm = vec_to_tsr(vec![1.0, 0.2, 0.3, 1.0], &[2, 2]);
        let err = opt.get_jk(&dm, true, true).unwrap_err();
        assert!(matches!(err, GvhfError::Unsupported(_)));
        let dm = vec_to_tsr(vec![1.0; 9], &[3, 3]);
        assert!(matches!(opt.get_jk(&dm, true, true), Err(GvhfError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_omega_long_range() {
        let cint_data = general_contracted_pair(false);
        let dm = symmetric_density(cint_data.nao(), 3, 9);
        let opt = VhfOpt::new(&cint_data, EngineConfig::default()).unwrap();
        let full = opt.get_jk(&dm, true, true).unwrap();
        let lr = opt.get_jk_omega(&dm, true, true, 0.4).unwrap();

        let mut cint_lr = cint_data.clone();
        cint_lr.env[crate::shell::PTR_RANGE_OMEGA] = 0.4;
        let (vj_ref, vk_ref) = reference_jk(&cint_lr, &dm);
        let (vj, vk) = (lr.vj.unwrap(), lr.vk.unwrap());
        assert!(max_abs_diff(vj.view(), vj_ref.view()) < 1e-9);
        assert!(max_abs_diff(vk.view(), vk_ref.view()) < 1e-9);
        assert!(max_abs_diff(vj.view(), full.vj.unwrap().view()) > 1e-3);
    }

    #[test]
    fn test_density_gate_skips_disjoint_groups() {
        let cint_data = four_distinct_atoms();
        let nao = cint_data.nao();
        // s, p, contracted s and d blocks, one atom each
        let dm = block_diagonal_density(&symmetric_density(nao, nao, 8), &[1, 3, 1, 5]);
        let opt = VhfOpt::new(&cint_data, EngineConfig::default()).unwrap();
        assert_eq!(opt.sorted().groups.len(), 4);
        let res = opt.get_jk(&dm, true, true).unwrap();
        assert!(res.stats.gated > 0);
        assert!(res.stats.launches > 0);
        let (vj_ref, vk_ref) = reference_jk(&cint_data, &dm);
        assert!(max_abs_diff(res.vj.unwrap().view(), vj_ref.view()) < 1e-10);
        assert!(max_abs_diff(res.vk.unwrap().view(), vk_ref.view()) < 1e-10);
    }

    #[test]
    fn test_quartet_screen_follows_density() {
        let cint_data = four_s_atoms(0.5, 1.5);
        let full = symmetric_density(4, 4, 12);
        let diagonal = block_diagonal_density(&full, &[1, 1, 1, 1]);

        let mut evaluated = vec![];
        for dm in [&full, &diagonal] {
            let accel = Arc::new(HostAccelerator::default());
            let opt = VhfOpt::with_accelerator(&cint_data, EngineConfig::default(), accel.clone()).unwrap();
            assert_eq!(opt.sorted().groups.len(), 1);
            let res = opt.get_jk(dm, true, true).unwrap();
            let (vj_ref, vk_ref) = reference_jk(&cint_data, dm);
            assert!(max_abs_diff(res.vj.unwrap().view(), vj_ref.view()) < 1e-10);
            assert!(max_abs_diff(res.vk.unwrap().view(), vk_ref.view()) < 1e-10);
            evaluated.push(accel.quartets_evaluated());
        }
        assert!(evaluated[1] < evaluated[0], "quartets evaluated: {evaluated:?}");
    }

    #[test]
    fn test_bin_pair_early_exit() {
        let cint_data = four_s_atoms(0.5, 1.5);
        let dm = 1e-20_f64 * symmetric_density(4, 4, 12);
        let accel = Arc::new(HostAccelerator::default());
        let config = EngineConfig { direct_scf_tol: 1e-30, ..Default::default() };
        let opt = VhfOpt::with_accelerator(&cint_data, config, accel.clone()).unwrap();
        let res = opt.get_jk(&dm, true, true).unwrap();
        assert_eq!(res.stats.gated, 0);
        assert!(res.stats.launches > 0);
        assert_eq!(accel.bin_pair_exits(), res.stats.launches);
        assert_eq!(accel.quartets_evaluated(), 0);
        assert_eq!(max_abs(res.vj.unwrap().view()), 0.0);
        assert_eq!(max_abs(res.vk.unwrap().view()), 0.0);
    }

    #[test]
    fn test_huge_direct_scf_tol_gates_everything() {
        let cint_data = four_distinct_atoms();
        let dm = symmetric_density(cint_data.nao(), 3, 6);
        let config = EngineConfig { direct_scf_tol: 1e10, ..Default::default() };
        let opt = VhfOpt::new(&cint_data, config).unwrap();
        let res = opt.get_jk(&dm, true, true).unwrap();
        assert_eq!(res.stats.launches, 0);
        assert!(res.stats.gated > 0);
        assert_eq!(max_abs(res.vj.unwrap().view()), 0.0);
        assert_eq!(max_abs(res.vk.unwrap().view()), 0.0);
    }

    #[test]
    fn test_gate_scales_with_density_count() {
        let cint_data = four_s_atoms(0.5, 1.5);
        let dm = symmetric_density(4, 2, 30);
        let unscreened = VhfOpt::new(&cint_data, EngineConfig::default()).unwrap();
        assert_eq!(unscreened.group_pairs().len(), 1);
        let max_q = unscreened.group_pairs()[0].max_q;
        let (vj_ref, vk_ref) = reference_jk(&cint_data, &dm);

        let config = EngineConfig { direct_scf_tol: 2.0 * max_abs(dm.view()) * max_q * max_q, ..Default::default() };
        let opt = VhfOpt::new(&cint_data, config).unwrap();
        let single = opt.get_jk(&dm, true, true).unwrap();
        assert_eq!(single.stats.launches, 0);
        assert_eq!(max_abs(single.vj.unwrap().view()), 0.0);

        // the tolerance is shared among the densities
        let mut dms: Tsr = rt::zeros(([4, 4, 4], &dm.device().clone()));
        for d in 0..4 {
            dms.i_mut(d).assign(dm.view());
        }
        let batch = opt.get_jk(&dms, true, true).unwrap();
        assert_eq!(batch.stats.gated, 0);
        assert!(batch.stats.launches > 0);
        let (vj, vk) = (batch.vj.unwrap(), batch.vk.unwrap());
        for d in 0..4 {
            assert!(max_abs_diff(vj.i(d), vj_ref.view()) < 1e-10);
            assert!(max_abs_diff(vk.i(d), vk_ref.view()) < 1e-10);
        }
    }

    #[test]
    fn test_gate_uses_unclipped_pair_bound() {
        // tight s shells have q = (ii|ii)^(1/2) well above one
        let cint_data = four_s_atoms(50.0, 1.0);
        let dm = vec_to_tsr(vec![1.0; 16], &[4, 4]);
        let unscreened = VhfOpt::new(&cint_data, EngineConfig::default()).unwrap();
        let max_q = unscreened.group_pairs()[0].max_q;
        assert!(max_q > 1.5);

        let config = EngineConfig { direct_scf_tol: 0.5 * max_q * max_q, ..Default::default() };
        let opt = VhfOpt::new(&cint_data, config).unwrap();
        let res = opt.get_jk(&dm, true, true).unwrap();
        assert_eq!(res.stats.gated, 0);
        let (vj_ref, vk_ref) = reference_jk(&cint_data, &dm);
        assert!(max_abs_diff(res.vj.unwrap().view(), vj_ref.view()) < 1e-9);
        assert!(max_abs_diff(res.vk.unwrap().view(), vk_ref.view()) < 1e-9);
    }

    /// Host accelerator that records the angular momenta it is asked to handle.
    #[derive(Default)]
    struct RecordingAccelerator {
        inner: HostAccelerator,
        seen_l: Mutex<Vec<usize>>,
        fail: bool,
    }

    impl Accelerator for RecordingAccelerator {
        type Resident = <HostAccelerator as Accelerator>::Resident;

        fn name(&self) -> &str {
            "recording"
        }

        fn lmax(&self, class: KernelClass) -> usize {
            match class {
                KernelClass::Jk => 1,
                _ => self.inner.lmax(class),
            }
        }

        fn available_memory(&self) -> usize {
            self.inner.available_memory()
        }

        fn alloc_device(&self, len: usize) -> GvhfResult<Vec<f64>> {
            self.inner.alloc_device(len)
        }

        fn init_basis_prod(&self, desc: &BasisProdDesc) -> GvhfResult<Self::Resident> {
            let ls = desc.pair2shls.iter().flat_map(|&[i, j]| [desc.tot.bas[i][1] as usize, desc.tot.bas[j][1] as usize]);
            self.seen_l.lock().unwrap().extend(ls);
            self.inner.init_basis_prod(desc)
        }

        fn release_basis_prod(&self, resident: &mut Self::Resident) {
            self.inner.release_basis_prod(resident)
        }

        fn build_jk(&self, resident: &Self::Resident, launch: JkLaunch<'_>) -> i32 {
            if self.fail && launch.cp_ij == launch.cp_kl && launch.cp_ij > 0 {
                return STATUS_OUT_OF_BOUNDS;
            }
            self.inner.build_jk(resident, launch)
        }

        fn fill(&self, resident: &Self::Resident, launch: FillLaunch<'_>) -> i32 {
            self.inner.fill(resident, launch)
        }
    }

    #[test]
    fn test_high_l_routed_to_fallback() {
        let cint_data = mixed_with_high_l(2);
        let dm = symmetric_density(cint_data.nao(), 3, 4);
        let (vj_ref, vk_ref) = reference_jk(&cint_data, &dm);

        let accel = Arc::new(RecordingAccelerator::default());
        let opt = VhfOpt::with_accelerator(&cint_data, EngineConfig::default(), accel.clone()).unwrap();
        assert!(accel.seen_l.lock().unwrap().iter().all(|&l| l <= 1));
        assert_eq!(opt.n_accelerated_shells(), opt.sorted().nbas() - 1);

        let res = opt.get_jk(&dm, true, true).unwrap();
        assert!(max_abs_diff(res.vj.unwrap().view(), vj_ref.view()) < 1e-9);
        assert!(max_abs_diff(res.vk.unwrap().view(), vk_ref.view()) < 1e-9);
    }

    #[test]
    fn test_custom_fallback_receives_high_l() {
        let cint_data = mixed_with_high_l(2);
        let dm = symmetric_density(cint_data.nao(), 3, 4);
        let (vj_ref, vk_ref) = reference_jk(&cint_data, &dm);

        let recording = RecordingFallback::default();
        let calls = recording.calls.clone();
        let accel = Arc::new(RecordingAccelerator::default());
        let opt = VhfOpt::with_accelerator(&cint_data, EngineConfig::default(), accel).unwrap().with_fallback(recording);
        let res = opt.get_jk(&dm, true, true).unwrap();
        assert_eq!(calls.jks(), 1);
        assert_eq!(calls.fills(), 0);
        assert!(max_abs_diff(res.vj.unwrap().view(), vj_ref.view()) < 1e-9);
        assert!(max_abs_diff(res.vk.unwrap().view(), vk_ref.view()) < 1e-9);

        // nothing above the kernel limit, nothing for the fallback
        let recording = RecordingFallback::default();
        let calls = recording.calls.clone();
        let opt = VhfOpt::new(&two_s_atoms(), EngineConfig::default()).unwrap().with_fallback(recording);
        opt.get_jk(&symmetric_density(2, 1, 7), true, true).unwrap();
        assert_eq!(calls.jks(), 0);
    }

    #[test]
    fn test_kernel_failure_reports_context() {
        let cint_data = mixed_with_high_l(1);
        let dm = symmetric_density(cint_data.nao(), 2, 4);
        let accel = Arc::new(RecordingAccelerator { fail: true, ..Default::default() });
        let opt = VhfOpt::with_accelerator(&cint_data, EngineConfig::default(), accel).unwrap();
        match opt.get_jk(&dm, true, false) {
            Err(GvhfError::Kernel { class, label, cp_ij, cp_kl, status }) => {
                assert_eq!(class, KernelClass::Jk);
                assert_eq!(cp_ij, cp_kl);
                assert_eq!(status, STATUS_OUT_OF_BOUNDS);
                assert!(label.starts_with('(') && label.contains('|'));
            },
            other => panic!("expected a kernel error, got {other:?}"),
        }
    }
}
