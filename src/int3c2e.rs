//! Three-center engine: `(ij|P)`, the `(P|Q)` metric and their density-fitting contractions.

use crate::canonical::canonicalize;
use crate::dispatch::{fill_aux_group, fill_int2c2e};
use crate::partition::split_groups;
use crate::prelude::*;
use crate::screening::make_group_pairs;
use crate::shell::point_charge_basis;
use crate::sort::sort_basis;
use crate::unsort::{rows_to_original, take_rows, to_original};
use crate::util::vec_to_tsr;
use std::ops::Range;
use std::sync::Arc;

/// Exponent of the s functions standing in for nuclear point charges.
const POINT_CHARGE_ZETA: f64 = 1e16;

/// `wj[P] = Σ (ij|P) D_ij` and `wk[P, i, o] = Σ_j (ij|P) C_jo`.
#[derive(Debug)]
pub struct WjkResults {
    pub wj: Tsr,
    pub wk: Tsr,
    /// Where `wk` was accumulated.
    pub placement: BufferPlacement,
}

/// `rhoj[P] = Σ (P|ij) D_ij` and `rhok[P] = Cᵗ (P|··) C`.
#[derive(Debug)]
pub struct RhoJkResults {
    pub rhoj: Tsr,
    pub rhok: Tsr,
    /// Where `rhok` was accumulated.
    pub placement: BufferPlacement,
}

/// Per-atom derivative contractions, `(natm, 3)` for the orbital molecule and `(natm_aux, 3)` for
/// the auxiliary one.
#[derive(Debug)]
pub struct IpJkResults {
    pub vj: Tsr,
    pub vk: Tsr,
    pub vjaux: Tsr,
    pub vkaux: Tsr,
}

/// One prepared basis: canonical form, its sorted split order and the transform between them.
#[derive(Debug)]
struct PreparedBasis {
    canonical: CanonicalBasis,
    sorted: SortedBasis,
    /// Canonical transform rows in sorted order, `(nao_c, nao)`.
    t_s: Tsr,
}

impl PreparedBasis {
    fn new(
        cint: &CInt,
        mode: ContractionMode,
        group_size: usize,
        lmax: usize,
        templates: &mut TemplateCache,
    ) -> GvhfResult<Self> {
        let canonical = canonicalize(cint, mode, templates)?;
        let mut sorted = sort_basis(&canonical.cint, &canonical.shells);
        sorted.groups = split_groups(&sorted.groups, group_size, lmax);
        sorted.groups.validate(&sorted.shells)?;
        let t_s = take_rows(canonical.transform.view(), &sorted.ao_idx);
        Ok(Self { canonical, sorted, t_s })
    }

    fn nao(&self) -> usize {
        self.canonical.nao
    }

    fn nao_c(&self) -> usize {
        self.sorted.nao()
    }

    fn working_density(&self, dm: &Tsr) -> Tsr {
        &self.t_s % dm % self.t_s.t()
    }

    /// Smallest range of caller functions the sorted working functions `rows` contribute to.
    fn touched(&self, rows: Range<usize>) -> Range<usize> {
        let weight = self.t_s.i(rows).abs().sum_axes(0);
        let mut nonzero = weight.iter().enumerate().filter(|(_, w)| **w != 0.0).map(|(p, _)| p);
        match nonzero.next() {
            Some(p0) => p0..nonzero.last().unwrap_or(p0) + 1,
            None => 0..0,
        }
    }

    /// Atom of each sorted Cartesian function.
    fn function_atoms(&self) -> Vec<usize> {
        let ao_loc = &self.sorted.ao_loc;
        self.sorted.shells.iter().enumerate().flat_map(|(s, shl)| std::iter::repeat_n(shl.atom, ao_loc[s + 1] - ao_loc[s])).collect()
    }
}

pub struct Int3c2eOpt<A: Accelerator = HostAccelerator> {
    input: CInt,
    aux_input: CInt,
    config: EngineConfig,
    aosym: bool,
    orb_templates: TemplateCache,
    aux_templates: TemplateCache,
    orb: PreparedBasis,
    aux: PreparedBasis,
    bins: Vec<GroupPairBins>,
    accel: Arc<A>,
    fallback: Box<dyn FallbackEvaluator>,
    cache: Option<BasisProdCache<A>>,
}

impl Int3c2eOpt<HostAccelerator> {
    /// `aosym` declares `(ij|P) = (ji|P)` and halves the orbital pairs evaluated.
    pub fn new(cint: &CInt, aux_cint: &CInt, config: EngineConfig, aosym: bool) -> GvhfResult<Self> {
        Self::with_accelerator(cint, aux_cint, config, aosym, Arc::new(HostAccelerator::default()))
    }
}

impl<A: Accelerator> Int3c2eOpt<A> {
    pub fn with_accelerator(
        cint: &CInt,
        aux_cint: &CInt,
        config: EngineConfig,
        aosym: bool,
        accel: Arc<A>,
    ) -> GvhfResult<Self> {
        config.check()?;
        let lmax = accel.lmax(KernelClass::Int3c2e);
        let mut orb_templates = TemplateCache::new();
        let mut aux_templates = TemplateCache::new();
        let orb = PreparedBasis::new(cint, config.mode, config.group_size, lmax, &mut orb_templates)?;
        let aux = PreparedBasis::new(aux_cint, config.mode, config.group_size_aux, lmax, &mut aux_templates)?;
        let mut opt = Int3c2eOpt {
            input: cint.clone(),
            aux_input: aux_cint.clone(),
            config,
            aosym,
            orb_templates,
            aux_templates,
            orb,
            aux,
            bins: vec![],
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

    pub fn aosym(&self) -> bool {
        self.aosym
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Atoms of both bases served from a cached contraction template.
    pub fn template_hits(&self) -> usize {
        self.orb_templates.hits() + self.aux_templates.hits()
    }

    /// Bytes held by the resident batch cache, zero after release.
    pub fn cache_nbytes(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.desc().nbytes())
    }

    pub fn is_released(&self) -> bool {
        self.cache.is_none()
    }

    fn build_cache(&mut self) -> GvhfResult<()> {
        let time = std::time::Instant::now();
        let (orb, aux) = (&self.orb, &self.aux);
        let q = SchwarzTable::build(&orb.sorted.cint, &orb.sorted.shells);
        let policy = PairingPolicy { aosym: self.aosym, diag_block_with_triu: self.config.diag_block_with_triu };
        self.bins = make_group_pairs(&q, &orb.sorted.groups, |_| true, self.config.cutoff, self.config.bin_size, policy);
        let desc = BasisProdDesc::new(&orb.sorted, &self.bins, Some((&aux.sorted, &aux.sorted.groups)), policy);
        self.cache = Some(BasisProdCache::build(self.accel.clone(), desc)?);
        log::info!(
            "three-center engine ready: {} orbital and {} auxiliary shells, {} orbital group pairs, aosym={}, {:.2?}",
            self.orb.sorted.nbas(),
            self.aux.sorted.nbas(),
            self.bins.len(),
            self.aosym,
            time.elapsed()
        );
        Ok(())
    }

    /// Rebuild both prepared bases and the batch cache under a new configuration.
    ///
    /// Contraction templates survive unless the contraction mode changes.
    pub fn rebuild(&mut self, config: EngineConfig) -> GvhfResult<()> {
        config.check()?;
        self.release();
        if config.mode != self.config.mode {
            self.orb_templates.clear();
            self.aux_templates.clear();
        }
        let lmax = self.accel.lmax(KernelClass::Int3c2e);
        self.orb = PreparedBasis::new(&self.input, config.mode, config.group_size, lmax, &mut self.orb_templates)?;
        self.aux =
            PreparedBasis::new(&self.aux_input, config.mode, config.group_size_aux, lmax, &mut self.aux_templates)?;
        self.config = config;
        self.build_cache()
    }

    pub fn release(&mut self) {
        if let Some(cache) = self.cache.take() {
            cache.release();
        }
    }

    fn cache(&self) -> GvhfResult<&BasisProdCache<A>> {
        self.cache.as_ref().ok_or_else(|| GvhfError::config("batch cache released; rebuild before use"))
    }

    /// Sorted three-center blocks of every auxiliary group, `(comp, nk, nao_c, nao_c)` each.
    fn for_each_aux_group(
        &self,
        class: KernelClass,
        mut f: impl FnMut(Range<usize>, &Tsr) -> GvhfResult<()>,
    ) -> GvhfResult<()> {
        if self.aosym && !class.orbital_symmetric() {
            return Err(GvhfError::unsupported(format!(
                "{} is not symmetric in the orbital indices; build the optimizer with aosym = false",
                class.intor()
            )));
        }
        let cache = self.cache()?;
        let nao_c = self.orb.nao_c();
        for ga in 0..self.aux.sorted.groups.len() {
            let (rows, blk) = fill_aux_group(
                cache,
                &*self.fallback,
                class,
                &self.orb.sorted.groups,
                &self.aux.sorted.groups,
                ga,
                self.config.omega,
            )?;
            let blk = vec_to_tsr(blk, &[class.ncomp(), rows.len(), nao_c, nao_c]);
            f(rows, &blk)?;
        }
        Ok(())
    }

    /// Add `T_aux_sᵗ · x` for the working auxiliary rows `rows` of `x`, `(nk, a, b)`, into `out`.
    fn add_aux_rows(&self, out: &mut StagedBuffer, rows: Range<usize>, x: Tsr) -> GvhfResult<()> {
        let p = self.aux.touched(rows.clone());
        if p.is_empty() {
            return Ok(());
        }
        let shape = x.shape().to_vec();
        let (nk, a, b) = (shape[0], shape[1], shape[2]);
        let t = self.aux.t_s.i((rows, p.clone()));
        let block = (t.t() % x.into_shape([nk, a * b])).into_shape([p.len(), a, b]);
        out.add_rows(p.start, &block)
    }

    /// Two-center class over the sorted working auxiliary functions, `(comp, naux_c, naux_c)`.
    fn working_metric(&self, class: KernelClass) -> GvhfResult<Tsr> {
        fill_int2c2e(self.cache()?, &*self.fallback, class, &self.aux.sorted.groups, self.config.omega)
    }

    fn nocc_of(&self, mo_occ: &Tsr) -> GvhfResult<usize> {
        let nao = self.orb.nao();
        match mo_occ.shape().as_slice() {
            [n, nocc] if *n == nao => Ok(*nocc),
            shape => Err(GvhfError::shape("occupied coefficients", &[nao, 0], shape)),
        }
    }

    /// `(P|ij)` in the caller's bases, shape `(naux, nao, nao)`.
    ///
    /// Accumulated one auxiliary group at a time into a buffer staged per the memory fraction of
    /// [`EngineConfig`].
    pub fn get_int3c2e(&self) -> GvhfResult<Tsr> {
        let (nao, naux) = (self.orb.nao(), self.aux.nao());
        let mut out = StagedBuffer::new(&*self.accel, &[naux, nao, nao], self.config.mem_fraction);
        self.for_each_aux_group(KernelClass::Int3c2e, |rows, blk| {
            let blk = to_original(blk.i(0), &self.orb.t_s);
            self.add_aux_rows(&mut out, rows, blk)
        })?;
        log::debug!("int3c2e ({:?}, {} transfers)", out.placement(), out.transfers());
        Ok(out.into_tsr())
    }

    /// `(P|Q)` in the caller's auxiliary basis.
    pub fn get_int2c2e(&self) -> GvhfResult<Tsr> {
        let naux = self.aux.nao();
        let metric = to_original(self.working_metric(KernelClass::Int2c2e)?.view(), &self.aux.t_s);
        Ok(metric.into_shape([naux, naux]))
    }

    /// `(∇P|Q)` in the caller's auxiliary basis, shape `(3, naux, naux)`.
    pub fn get_int2c2e_ip1(&self) -> GvhfResult<Tsr> {
        Ok(to_original(self.working_metric(KernelClass::Int2c2eIp1)?.view(), &self.aux.t_s))
    }

    /// Density and occupied-orbital contractions of `(ij|P)`.
    ///
    /// `wk` has shape `(naux, nao, nocc)`; it is placed on the device when it fits the memory
    /// fraction of [`EngineConfig`] and staged in host memory otherwise.
    pub fn get_int3c2e_wjk(&self, dm: &Tsr, mo_occ: &Tsr) -> GvhfResult<WjkResults> {
        let time = std::time::Instant::now();
        let (nao, naux) = (self.orb.nao(), self.aux.nao());
        check_shape("density", dm.shape(), &[nao, nao])?;
        let nocc = self.nocc_of(mo_occ)?;
        let (nao_c, naux_c) = (self.orb.nao_c(), self.aux.nao_c());
        let nn = nao_c * nao_c;

        let dm_s = self.orb.working_density(dm);
        let c_s = &self.orb.t_s % mo_occ;
        let device = dm_s.device().clone();
        let mut wj_s: Tsr = rt::zeros(([naux_c], &device));
        let mut wk = StagedBuffer::new(&*self.accel, &[naux, nao, nocc], self.config.mem_fraction);
        self.for_each_aux_group(KernelClass::Int3c2e, |rows, blk| {
            let nk = rows.len();
            wj_s.i_mut(rows.clone()).assign(blk.reshape([nk, nn]) % dm_s.reshape([nn]));
            let b_c = (blk.reshape([nk * nao_c, nao_c]) % &c_s).into_shape([nk, nao_c, nocc]);
            let mut wk_g: Tsr = rt::zeros(([nk, nao, nocc], &device));
            for k in 0..nk {
                wk_g.i_mut(k).assign(self.orb.t_s.t() % b_c.i(k));
            }
            self.add_aux_rows(&mut wk, rows, wk_g)
        })?;

        let wj = rows_to_original(wj_s.view(), &self.aux.t_s);
        let placement = wk.placement();
        log::debug!("wj/wk for nocc = {nocc} ({placement:?}, {} transfers): {:.2?}", wk.transfers(), time.elapsed());
        Ok(WjkResults { wj, wk: wk.into_tsr(), placement })
    }

    /// Fitted-density right-hand sides: `rhoj` of shape `(naux,)` and `rhok` of shape
    /// `(naux, nocc, nocc)` with `rhok[P] = Cᵗ (P|··) C`.
    pub fn get_int3c2e_jk(&self, dm: &Tsr, mo_occ: &Tsr) -> GvhfResult<RhoJkResults> {
        let time = std::time::Instant::now();
        let (nao, naux) = (self.orb.nao(), self.aux.nao());
        check_shape("density", dm.shape(), &[nao, nao])?;
        let nocc = self.nocc_of(mo_occ)?;
        let (nao_c, naux_c) = (self.orb.nao_c(), self.aux.nao_c());
        let nn = nao_c * nao_c;

        let dm_s = self.orb.working_density(dm);
        let c_s = &self.orb.t_s % mo_occ;
        let device = dm_s.device().clone();
        let mut rhoj_s: Tsr = rt::zeros(([naux_c], &device));
        let mut rhok = StagedBuffer::new(&*self.accel, &[naux, nocc, nocc], self.config.mem_fraction);
        self.for_each_aux_group(KernelClass::Int3c2e, |rows, blk| {
            let nk = rows.len();
            rhoj_s.i_mut(rows.clone()).assign(blk.reshape([nk, nn]) % dm_s.reshape([nn]));
            let mut r: Tsr = rt::zeros(([nk, nocc, nocc], &device));
            for k in 0..nk {
                r.i_mut(k).assign(c_s.t() % blk.i((0, k)) % &c_s);
            }
            self.add_aux_rows(&mut rhok, rows, r)
        })?;

        let placement = rhok.placement();
        log::debug!("rhoj/rhok for nocc = {nocc} ({placement:?}): {:.2?}", time.elapsed());
        Ok(RhoJkResults { rhoj: rows_to_original(rhoj_s.view(), &self.aux.t_s), rhok: rhok.into_tsr(), placement })
    }

    /// First pass of the density-fitted Coulomb build, `rhoj[P] = Σ (P|ij) D_ij`.
    pub fn get_j_int3c2e_pass1(&self, dm: &Tsr) -> GvhfResult<Tsr> {
        let nao = self.orb.nao();
        check_shape("density", dm.shape(), &[nao, nao])?;
        let nao_c = self.orb.nao_c();
        let nn = nao_c * nao_c;

        let dm_s = self.orb.working_density(dm);
        let mut rhoj_s: Tsr = rt::zeros(([self.aux.nao_c()], &dm_s.device().clone()));
        self.for_each_aux_group(KernelClass::Int3c2e, |rows, blk| {
            let nk = rows.len();
            rhoj_s.i_mut(rows).assign(blk.reshape([nk, nn]) % dm_s.reshape([nn]));
            Ok(())
        })?;
        Ok(rows_to_original(rhoj_s.view(), &self.aux.t_s))
    }

    /// Second pass, `vj[i, j] = Σ_P (ij|P) rhoj[P]` for a fitted `rhoj` of shape `(naux,)`.
    pub fn get_j_int3c2e_pass2(&self, rhoj: &Tsr) -> GvhfResult<Tsr> {
        check_shape("rhoj", rhoj.shape(), &[self.aux.nao()])?;
        let nao_c = self.orb.nao_c();
        let nn = nao_c * nao_c;

        let rhoj_s = &self.aux.t_s % rhoj;
        let mut vj_s: Tsr = rt::zeros(([nao_c, nao_c], &rhoj_s.device().clone()));
        self.for_each_aux_group(KernelClass::Int3c2e, |rows, blk| {
            let nk = rows.len();
            vj_s += &(rhoj_s.i(rows) % blk.reshape([nk, nn])).into_shape([nao_c, nao_c]);
            Ok(())
        })?;
        Ok(self.orb.t_s.t() % &vj_s % &self.orb.t_s)
    }

    /// Nuclear-derivative contractions of `(ij|P)` with fitted densities.
    ///
    /// `rhoj` has shape `(naux,)` and `rhok` shape `(naux, nocc, nocc)`, both in the caller's
    /// auxiliary basis. Returns `vj[A] = -Σ_{i∈A} Σ (∇i j|P) D_ij rhoj_P` and the analogous
    /// exchange and auxiliary-center terms.
    pub fn get_int3c2e_ip_jk(&self, dm: &Tsr, mo_occ: &Tsr, rhoj: &Tsr, rhok: &Tsr) -> GvhfResult<IpJkResults> {
        let time = std::time::Instant::now();
        let (nao, naux) = (self.orb.nao(), self.aux.nao());
        check_shape("density", dm.shape(), &[nao, nao])?;
        let nocc = self.nocc_of(mo_occ)?;
        check_shape("rhoj", rhoj.shape(), &[naux])?;
        check_shape("rhok", rhok.shape(), &[naux, nocc, nocc])?;
        let (nao_c, naux_c) = (self.orb.nao_c(), self.aux.nao_c());

        let dm_s = self.orb.working_density(dm);
        let c_s = &self.orb.t_s % mo_occ;
        // fitted densities onto the sorted working auxiliary functions
        let rhoj_s = &self.aux.t_s % rhoj;
        let rhok_s = (&self.aux.t_s % rhok.reshape([naux, nocc * nocc])).into_shape([naux_c, nocc, nocc]);
        let device = dm_s.device().clone();

        let mut vj_c: Tsr = rt::zeros(([nao_c, 3], &device));
        let mut vk_c: Tsr = rt::zeros(([nao_c, 3], &device));
        self.for_each_aux_group(KernelClass::Int3c2eIp1, |rows, blk| {
            for (kk, k) in rows.enumerate() {
                let w = &c_s % rhok_s.i(k) % c_s.t();
                let d = rhoj_s[[k]] * &dm_s;
                for x in 0..3 {
                    let b = blk.i((x, kk));
                    *&mut vj_c.i_mut((.., x)) += (&b * &d).sum_axes(1);
                    *&mut vk_c.i_mut((.., x)) += (&b * &w).sum_axes(1);
                }
            }
            Ok(())
        })?;

        let mut vjaux_c: Tsr = rt::zeros(([naux_c, 3], &device));
        let mut vkaux_c: Tsr = rt::zeros(([naux_c, 3], &device));
        self.for_each_aux_group(KernelClass::Int3c2eIp2, |rows, blk| {
            for (kk, k) in rows.enumerate() {
                let w = &c_s % rhok_s.i(k) % c_s.t();
                for x in 0..3 {
                    let b = blk.i((x, kk));
                    vjaux_c[[k, x]] += rhoj_s[[k]] * (&b * &dm_s).sum();
                    vkaux_c[[k, x]] += (&b * &w).sum();
                }
            }
            Ok(())
        })?;

        let orb_atoms = self.orb.function_atoms();
        let aux_atoms = self.aux.function_atoms();
        let (natm, natm_aux) = (self.input.atm.len(), self.aux_input.atm.len());
        log::debug!("three-center derivative contractions: {:.2?}", time.elapsed());
        Ok(IpJkResults {
            vj: -1.0_f64 * per_atom(&vj_c, &orb_atoms, natm),
            vk: -1.0_f64 * per_atom(&vk_c, &orb_atoms, natm),
            vjaux: -1.0_f64 * per_atom(&vjaux_c, &aux_atoms, natm_aux),
            vkaux: -1.0_f64 * per_atom(&vkaux_c, &aux_atoms, natm_aux),
        })
    }

    /// Metric-derivative contractions per auxiliary atom, `(natm_aux, 3)` each:
    /// `vjaux[A] = Σ_{P∈A} Σ_Q (∇P|Q) rhoj_P rhoj_Q` and
    /// `vkaux[A] = Σ_{P∈A} Σ_Q (∇P|Q) Σ_ij rhok_Pij rhok_Qij`.
    pub fn get_int2c2e_ip_jk(&self, rhoj: &Tsr, rhok: &Tsr) -> GvhfResult<(Tsr, Tsr)> {
        let naux = self.aux.nao();
        check_shape("rhoj", rhoj.shape(), &[naux])?;
        let oo = match rhok.shape().as_slice() {
            [n, a, b] if *n == naux => a * b,
            shape => return Err(GvhfError::shape("rhok", &[naux, 0, 0], shape)),
        };
        let naux_c = self.aux.nao_c();

        let ip1 = self.working_metric(KernelClass::Int2c2eIp1)?;
        let rhoj_s = &self.aux.t_s % rhoj;
        let rhok_s = &self.aux.t_s % rhok.reshape([naux, oo]);
        let w = &rhok_s % rhok_s.t();
        let device = rhoj_s.device().clone();
        let mut vj_c: Tsr = rt::zeros(([naux_c, 3], &device));
        let mut vk_c: Tsr = rt::zeros(([naux_c, 3], &device));
        for x in 0..3 {
            let m = ip1.i(x);
            *&mut vj_c.i_mut((.., x)) += &rhoj_s * (&m % &rhoj_s);
            *&mut vk_c.i_mut((.., x)) += (&m * &w).sum_axes(1);
        }
        let atoms = self.aux.function_atoms();
        let natm_aux = self.aux_input.atm.len();
        Ok((per_atom(&vj_c, &atoms, natm_aux), per_atom(&vk_c, &atoms, natm_aux)))
    }

    /// `v[P, x] = Σ_ij (∇i j|P) D_ij` over the caller's auxiliary functions, `(naux, 3)`.
    fn contract_ip1_density(&self, dm: &Tsr) -> GvhfResult<Tsr> {
        let nao = self.orb.nao();
        check_shape("density", dm.shape(), &[nao, nao])?;
        let nao_c = self.orb.nao_c();
        let nn = nao_c * nao_c;

        let dm_s = self.orb.working_density(dm);
        let mut v_s: Tsr = rt::zeros(([self.aux.nao_c(), 3], &dm_s.device().clone()));
        self.for_each_aux_group(KernelClass::Int3c2eIp1, |rows, blk| {
            let nk = rows.len();
            let v = (blk.reshape([3 * nk, nn]) % dm_s.reshape([nn])).into_shape([3, nk]);
            v_s.i_mut((rows, ..)).assign(v.t());
            Ok(())
        })?;
        Ok(rows_to_original(v_s.view(), &self.aux.t_s))
    }
}

/// Sum rows of a `(nfunc, 3)` matrix onto the atoms owning the functions.
fn per_atom(v: &Tsr, atoms: &[usize], natm: usize) -> Tsr {
    let mut out: Tsr = rt::zeros(([natm, 3], &v.device().clone()));
    for (f, &a) in atoms.iter().enumerate() {
        *&mut out.i_mut(a) += &v.i(f);
    }
    out
}

/// Nuclear-attraction derivative `dh1e[A, x] = 2 (-Z_A) Σ_ij (∇i j|δ_A) D_ij`, shape `(natm, 3)`.
///
/// The nuclei are modelled as sharp normalized s Gaussians, so the derivative integrals come from
/// the three-center engine.
pub fn get_dh1e(cint: &CInt, dm: &Tsr, config: EngineConfig) -> GvhfResult<Tsr> {
    let charges = point_charge_basis(cint, POINT_CHARGE_ZETA);
    let opt = Int3c2eOpt::new(cint, &charges, config, false)?;
    let v = opt.contract_ip1_density(dm)?;
    let z = vec_to_tsr(cint.atom_charges(), &[cint.atm.len(), 1]);
    Ok(-2.0_f64 * (z * v))
}

fn check_shape(what: &str, found: &[usize], expected: &[usize]) -> GvhfResult<()> {
    if found != expected {
        return Err(GvhfError::shape(what, expected, found));
    }
    Ok(())
}

impl<A: Accelerator> std::fmt::Debug for Int3c2eOpt<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Int3c2eOpt")
            .field("accelerator", &self.accel.name())
            .field("fallback", &self.fallback.name())
            .field("aosym", &self.aosym)
            .field("nbas", &self.orb.sorted.nbas())
            .field("nbas_aux", &self.aux.sorted.nbas())
            .field("group_pairs", &self.bins.len())
            .field("cache", &self.cache)
            .finish()
    }
}
