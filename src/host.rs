//! Host implementation of the accelerator: libcint evaluates each shell quartet or triple, rayon
//! spreads the bra pairs of a launch over threads.

use crate::prelude::*;
use crate::shell::PTR_RANGE_OMEGA;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const STATUS_OK: i32 = 0;
pub const STATUS_BAD_GROUP_PAIR: i32 = 1;
pub const STATUS_OUT_OF_BOUNDS: i32 = 2;
pub const STATUS_CLASS_MISMATCH: i32 = 3;
pub const STATUS_RELEASED: i32 = 4;

/// Smallest number of bra pairs handed to one thread.
const MIN_PAIRS_PER_TASK: usize = 4;

#[derive(Debug)]
pub struct HostAccelerator {
    lmax_jk: usize,
    lmax_df: usize,
    memory_capacity: usize,
    resident_bytes: AtomicUsize,
    live_caches: AtomicUsize,
    quartets: AtomicUsize,
    bin_exits: AtomicUsize,
}

impl Default for HostAccelerator {
    fn default() -> Self {
        Self {
            lmax_jk: KernelClass::Jk.default_lmax(),
            lmax_df: KernelClass::Int3c2e.default_lmax(),
            memory_capacity: 8 << 30,
            resident_bytes: AtomicUsize::new(0),
            live_caches: AtomicUsize::new(0),
            quartets: AtomicUsize::new(0),
            bin_exits: AtomicUsize::new(0),
        }
    }
}

impl HostAccelerator {
    pub fn with_lmax(mut self, lmax_jk: usize, lmax_df: usize) -> Self {
        self.lmax_jk = lmax_jk;
        self.lmax_df = lmax_df;
        self
    }

    pub fn with_memory(mut self, bytes: usize) -> Self {
        self.memory_capacity = bytes;
        self
    }

    /// Batch caches currently resident.
    pub fn live_caches(&self) -> usize {
        self.live_caches.load(Ordering::SeqCst)
    }

    /// J/K shell quartets evaluated since construction.
    pub fn quartets_evaluated(&self) -> usize {
        self.quartets.load(Ordering::SeqCst)
    }

    /// J/K bin pairs that exited on their combined bound without evaluating anything.
    pub fn bin_pair_exits(&self) -> usize {
        self.bin_exits.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct HostResident {
    desc: BasisProdDesc,
    nbytes: usize,
    released: bool,
}

impl Accelerator for HostAccelerator {
    type Resident = HostResident;

    fn name(&self) -> &str {
        "host"
    }

    fn lmax(&self, class: KernelClass) -> usize {
        match class {
            KernelClass::Jk => self.lmax_jk,
            _ => self.lmax_df,
        }
    }

    fn available_memory(&self) -> usize {
        self.memory_capacity.saturating_sub(self.resident_bytes.load(Ordering::SeqCst))
    }

    fn alloc_device(&self, len: usize) -> GvhfResult<Vec<f64>> {
        let requested = len * std::mem::size_of::<f64>();
        let available = self.available_memory();
        if requested > available {
            return Err(GvhfError::OutOfMemory { requested, available });
        }
        Ok(vec![0.0; len])
    }

    fn init_basis_prod(&self, desc: &BasisProdDesc) -> GvhfResult<HostResident> {
        let nbytes = desc.nbytes();
        let available = self.available_memory();
        if nbytes > available {
            return Err(GvhfError::OutOfMemory { requested: nbytes, available });
        }
        self.resident_bytes.fetch_add(nbytes, Ordering::SeqCst);
        self.live_caches.fetch_add(1, Ordering::SeqCst);
        Ok(HostResident { desc: desc.clone(), nbytes, released: false })
    }

    fn release_basis_prod(&self, resident: &mut HostResident) {
        if resident.released {
            return;
        }
        self.resident_bytes.fetch_sub(resident.nbytes, Ordering::SeqCst);
        self.live_caches.fetch_sub(1, Ordering::SeqCst);
        resident.desc.pair2shls = vec![];
        resident.desc.pair_log_q = vec![];
        resident.released = true;
    }

    fn build_jk(&self, resident: &HostResident, launch: JkLaunch<'_>) -> i32 {
        match host_build_jk(resident, launch) {
            Ok(Some(n)) => {
                self.quartets.fetch_add(n, Ordering::SeqCst);
                STATUS_OK
            },
            Ok(None) => {
                self.bin_exits.fetch_add(1, Ordering::SeqCst);
                STATUS_OK
            },
            Err(status) => status,
        }
    }

    fn fill(&self, resident: &HostResident, launch: FillLaunch<'_>) -> i32 {
        if resident.released {
            return STATUS_RELEASED;
        }
        let FillLaunch { class, mut out, cp_ij, cp_aux, omega } = launch;
        match fill_blocks(&resident.desc, class, cp_ij, cp_aux, &mut out, omega) {
            Ok(()) => STATUS_OK,
            Err(status) => status,
        }
    }
}

/* #region J/K */

/// Quartets evaluated by one launch, `None` when the bin pair exits early.
fn host_build_jk(resident: &HostResident, launch: JkLaunch<'_>) -> Result<Option<usize>, i32> {
    if resident.released {
        return Err(STATUS_RELEASED);
    }
    let desc = &resident.desc;
    let JkLaunch { mut vj, mut vk, dms, dm_shl_log, cp_ij, cp_kl, bin_ij, bin_kl, log_dm_cond, log_cutoff, omega } =
        launch;

    let (pairs_ij, pairs_kl) = match (desc.pairs(cp_ij), desc.pairs(cp_kl)) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(STATUS_BAD_GROUP_PAIR),
    };
    let (logq_ij, logq_kl) = match (desc.log_q(cp_ij), desc.log_q(cp_kl)) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(STATUS_BAD_GROUP_PAIR),
    };
    let (diag_ij, diag_kl) = match (desc.kinds[cp_ij], desc.kinds[cp_kl]) {
        (GroupPairKind::Orbital { diag: a, .. }, GroupPairKind::Orbital { diag: b, .. }) => (a, b),
        _ => return Err(STATUS_CLASS_MISMATCH),
    };
    if bin_ij.start > bin_ij.end || bin_ij.end > pairs_ij.len() || bin_kl.start > bin_kl.end || bin_kl.end > pairs_kl.len() {
        return Err(STATUS_OUT_OF_BOUNDS);
    }

    // one early-exit test for the whole bin pair
    if bin_ij.floor + bin_kl.floor + log_dm_cond < log_cutoff {
        return Ok(None);
    }

    let [n_dm, nao, _] = dms.shape();
    let nbas = desc.nbas_orb;
    if nao != desc.ao_loc[nbas] || dm_shl_log.len() != nbas * nbas {
        return Err(STATUS_OUT_OF_BOUNDS);
    }
    let with_j = vj.is_some();
    let with_k = vk.is_some();

    let cint_omega;
    let cint = if omega != 0.0 {
        let mut cint = desc.tot.clone();
        cint.env[PTR_RANGE_OMEGA] = omega;
        cint_omega = cint;
        &cint_omega
    } else {
        &desc.tot
    };

    let pair_weight = |diag: bool, i: usize, j: usize| {
        if diag && (desc.diag_block_with_triu || i == j) { 0.5 } else { 1.0 }
    };
    let gp_fac = if cp_ij == cp_kl { 0.5 } else { 1.0 };
    let dm_log = |i: usize, j: usize| dm_shl_log[i * nbas + j];

    let bra: Vec<usize> = (bin_ij.start..bin_ij.end).collect();
    let chunk = bra.len().div_ceil(rayon::current_num_threads().max(1)).max(MIN_PAIRS_PER_TASK);

    // chunks are reduced in order so repeated launches give identical sums
    let partials: Vec<(Option<ShellTiles>, Option<ShellTiles>, usize)> = bra
        .par_chunks(chunk)
        .map(|chunk| {
            let mut xj = with_j.then(|| ShellTiles::new(&desc.ao_loc, n_dm));
            let mut xk = with_k.then(|| ShellTiles::new(&desc.ao_loc, n_dm));
            let mut count = 0;
            for &a in chunk {
                let [i, j] = pairs_ij[a];
                for b in bin_kl.start..bin_kl.end {
                    let [k, l] = pairs_kl[b];
                    let log_dm = [dm_log(i, j), dm_log(k, l), dm_log(i, k), dm_log(i, l), dm_log(j, k), dm_log(j, l)]
                        .into_iter()
                        .fold(f64::NEG_INFINITY, f64::max);
                    if logq_ij[a] + logq_kl[b] + log_dm < log_cutoff {
                        continue;
                    }
                    let fac = pair_weight(diag_ij, i, j) * pair_weight(diag_kl, k, l) * gp_fac;
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
        if let (Some(out), Some(x)) = (vj.as_mut(), xj) {
            if !out.add_tiles(&x) {
                return Err(STATUS_OUT_OF_BOUNDS);
            }
        }
        if let (Some(out), Some(x)) = (vk.as_mut(), xk) {
            if !out.add_tiles(&x) {
                return Err(STATUS_OUT_OF_BOUNDS);
            }
        }
        count += n;
    }
    Ok(Some(count))
}

/// `(ij|kl)` of one shell quartet, row-major `(ni, nj, nk, nl)`.
pub(crate) fn eval_quartet(cint: &CInt, shls: [usize; 4]) -> Vec<f64> {
    let [i, j, k, l] = shls;
    let (out, _) = cint.integrate_row_major("int2e", None, [[i, i + 1], [j, j + 1], [k, k + 1], [l, l + 1]]).into();
    out
}

/// Output block and density block of each J contribution, as quartet axes.
const J_TARGETS: [([usize; 2], [usize; 2]); 2] = [([0, 1], [2, 3]), ([2, 3], [0, 1])];
/// Same for K.
const K_TARGETS: [([usize; 2], [usize; 2]); 4] = [([0, 2], [1, 3]), ([0, 3], [1, 2]), ([1, 2], [0, 3]), ([1, 3], [0, 2])];

/// Sparse J/K accumulator holding one `(n_dm, ni, nj)` tile per touched shell pair.
#[derive(Debug)]
pub(crate) struct ShellTiles<'a> {
    ao_loc: &'a [usize],
    n_dm: usize,
    tiles: HashMap<[usize; 2], Vec<f64>>,
}

impl<'a> ShellTiles<'a> {
    pub fn new(ao_loc: &'a [usize], n_dm: usize) -> Self {
        Self { ao_loc, n_dm, tiles: HashMap::new() }
    }

    fn nfunc(&self, shl: usize) -> usize {
        self.ao_loc[shl + 1] - self.ao_loc[shl]
    }

    fn tile(&mut self, r: usize, c: usize) -> &mut [f64] {
        let len = self.n_dm * self.nfunc(r) * self.nfunc(c);
        self.tiles.entry([r, c]).or_insert_with(|| vec![0.0; len])
    }

    /// `tile[d, x, y] += scale * fac * (quartet) * D[d, u, v]` for every target pairing of
    /// output axes `(x, y)` with density axes `(u, v)`.
    fn add_quartet(
        &mut self,
        eri: &[f64],
        shls: [usize; 4],
        fac: f64,
        dms: &DenseView,
        targets: &[([usize; 2], [usize; 2])],
        scale: f64,
    ) {
        let off = shls.map(|s| self.ao_loc[s]);
        let dims = shls.map(|s| self.nfunc(s));
        let n_dm = self.n_dm;
        for &([r, c], [u, v]) in targets {
            let (nr, nc) = (dims[r], dims[c]);
            let tile = self.tile(shls[r], shls[c]);
            for (flat, &x) in eri.iter().enumerate() {
                let x = scale * fac * x;
                if x == 0.0 {
                    continue;
                }
                let idx = [
                    flat / (dims[1] * dims[2] * dims[3]),
                    flat / (dims[2] * dims[3]) % dims[1],
                    flat / dims[3] % dims[2],
                    flat % dims[3],
                ];
                for d in 0..n_dm {
                    tile[(d * nr + idx[r]) * nc + idx[c]] += x * dms.get(d, off[u] + idx[u], off[v] + idx[v]);
                }
            }
        }
    }

    pub fn n_tiles(&self) -> usize {
        self.tiles.len()
    }

    /// Add every tile into a full row-major `(n_dm, nao, nao)` buffer. False when a tile falls
    /// outside it.
    pub fn scatter(&self, out: &mut [f64], nao: usize) -> bool {
        if out.len() != self.n_dm * nao * nao {
            return false;
        }
        for (&[r, c], tile) in &self.tiles {
            let (r0, c0) = (self.ao_loc[r], self.ao_loc[c]);
            let (nr, nc) = (self.nfunc(r), self.nfunc(c));
            if r0 + nr > nao || c0 + nc > nao {
                return false;
            }
            for d in 0..self.n_dm {
                for a in 0..nr {
                    let dst = &mut out[(d * nao + r0 + a) * nao + c0..][..nc];
                    dst.iter_mut().zip(&tile[(d * nr + a) * nc..][..nc]).for_each(|(o, x)| *o += x);
                }
            }
        }
        true
    }
}

/// Add the weighted quartet to the J/K tiles of every density.
///
/// The tiles hold `X` with `J = X + Xᵗ` and `K = X + Xᵗ`; `fac` carries the pair and quartet
/// degeneracy weights.
pub(crate) fn contract_jk(
    eri: &[f64],
    shls: [usize; 4],
    fac: f64,
    dms: &DenseView,
    vj: Option<&mut ShellTiles>,
    vk: Option<&mut ShellTiles>,
) {
    if let Some(vj) = vj {
        vj.add_quartet(eri, shls, fac, dms, &J_TARGETS, 2.0);
    }
    if let Some(vk) = vk {
        vk.add_quartet(eri, shls, fac, dms, &K_TARGETS, 1.0);
    }
}

/* #endregion */

/* #region fill */

/// Component stride and per-axis strides of a libcint row-major output of extents `dims`,
/// whichever side the component axis is on.
fn output_strides(shape: &[usize], comp: usize, dims: &[usize]) -> Option<(usize, Vec<usize>)> {
    let row_major = |inner: usize| {
        let mut strides = vec![inner; dims.len()];
        for a in (0..dims.len().saturating_sub(1)).rev() {
            strides[a] = strides[a + 1] * dims[a + 1];
        }
        strides
    };
    let n: usize = dims.iter().product();
    if comp == 1 && shape == dims {
        return Some((0, row_major(1)));
    }
    if shape.len() == dims.len() + 1 {
        if shape[0] == comp && &shape[1..] == dims {
            return Some((n, row_major(1)));
        }
        if shape[dims.len()] == comp && &shape[..dims.len()] == dims {
            return Some((1, row_major(comp)));
        }
    }
    None
}

/// Evaluate every triple (or auxiliary pair for two-center classes) of `cp_ij` x `cp_aux` into
/// `out`.
///
/// `out` is indexed `(comp, k, i, j)` in the global function numbering of `desc`; for two-center
/// classes the bra auxiliary function takes the `i` axis and `j` is a unit axis at its offset.
pub(crate) fn fill_blocks(
    desc: &BasisProdDesc,
    class: KernelClass,
    cp_ij: usize,
    cp_aux: usize,
    out: &mut BlockViewMut,
    omega: f64,
) -> Result<(), i32> {
    let (bra, ket) = match (desc.pairs(cp_ij), desc.pairs(cp_aux)) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(STATUS_BAD_GROUP_PAIR),
    };
    let (kind_ij, kind_aux) = (desc.kinds[cp_ij], desc.kinds[cp_aux]);
    let two_center = match (class, kind_ij, kind_aux) {
        (c, GroupPairKind::Auxiliary { .. }, GroupPairKind::Auxiliary { .. }) if c.two_center() => true,
        (
            KernelClass::Int3c2e | KernelClass::Int3c2eIp1 | KernelClass::Int3c2eIp2,
            GroupPairKind::Orbital { .. },
            GroupPairKind::Auxiliary { .. },
        ) => false,
        _ => return Err(STATUS_CLASS_MISMATCH),
    };

    let cint_omega;
    let cint = if omega != 0.0 {
        let mut cint = desc.tot.clone();
        cint.env[PTR_RANGE_OMEGA] = omega;
        cint_omega = cint;
        &cint_omega
    } else {
        &desc.tot
    };
    let ao_loc = &desc.ao_loc;
    let comp = class.ncomp();
    let intor = class.intor();

    let tasks: Vec<([usize; 2], usize)> = bra.iter().flat_map(|&pair| ket.iter().map(move |&[k, _]| (pair, k))).collect();
    let results: Vec<(Vec<f64>, Vec<usize>)> = tasks
        .par_iter()
        .map(|&([i, j], k)| {
            if two_center {
                cint.integrate_row_major(intor, None, [[i, i + 1], [k, k + 1]]).into()
            } else {
                cint.integrate_row_major(intor, None, [[i, i + 1], [j, j + 1], [k, k + 1]]).into()
            }
        })
        .collect();

    for (&([i, j], k), (data, shape)) in tasks.iter().zip(&results) {
        let ni = ao_loc[i + 1] - ao_loc[i];
        let nk = ao_loc[k + 1] - ao_loc[k];
        // two-center output is (i, k); address it as (i, 1, k) at the block's j offset
        let (nj, j0, strides) = if two_center {
            let Some((sc, s)) = output_strides(shape, comp, &[ni, nk]) else {
                return Err(STATUS_OUT_OF_BOUNDS);
            };
            (1, out.offsets()[2], [sc, s[0], 0, s[1]])
        } else {
            let nj = ao_loc[j + 1] - ao_loc[j];
            let Some((sc, s)) = output_strides(shape, comp, &[ni, nj, nk]) else {
                return Err(STATUS_OUT_OF_BOUNDS);
            };
            (nj, ao_loc[j], [sc, s[0], s[1], s[2]])
        };
        let [sc, si, sj, sk] = strides;
        for c in 0..comp {
            for a in 0..ni {
                for b in 0..nj {
                    for e in 0..nk {
                        let v = data[c * sc + a * si + b * sj + e * sk];
                        if !out.set(c, ao_loc[k] + e, ao_loc[i] + a, j0 + b, v) {
                            return Err(STATUS_OUT_OF_BOUNDS);
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/* #endregion */

#[cfg(test)]
mod test {
    use super::*;
    use crate::fixtures::*;

    #[test]
    fn test_output_strides() {
        assert_eq!(output_strides(&[2, 3, 4], 1, &[2, 3, 4]), Some((0, vec![12, 4, 1])));
        assert_eq!(output_strides(&[3, 2, 3, 4], 3, &[2, 3, 4]), Some((24, vec![12, 4, 1])));
        assert_eq!(output_strides(&[2, 3, 4, 3], 3, &[2, 3, 4]), Some((1, vec![36, 12, 3])));
        assert_eq!(output_strides(&[1, 5, 6], 1, &[5, 6]), Some((30, vec![6, 1])));
        assert_eq!(output_strides(&[2, 3, 5], 1, &[2, 3, 4]), None);
    }

    #[test]
    fn test_shell_tiles_match_dense_contraction() {
        // shells s, p, s, p
        let ao_loc = [0, 1, 4, 5, 8];
        let nao = 8;
        let shls = [3, 1, 2, 1];
        let dims = shls.map(|s| ao_loc[s + 1] - ao_loc[s]);
        let eri: Vec<f64> = (0..dims.iter().product()).map(|x| (x as f64 * 0.37).sin()).collect();
        let dm = symmetric_density(nao, 3, 2);
        let dm_flat = crate::util::tsr_to_vec(dm.view());
        let dms = DenseView::new(&dm_flat, [1, nao, nao]).unwrap();

        let mut tj = ShellTiles::new(&ao_loc, 1);
        let mut tk = ShellTiles::new(&ao_loc, 1);
        contract_jk(&eri, shls, 0.5, &dms, Some(&mut tj), Some(&mut tk));
        assert!(tj.n_tiles() <= 2 && tk.n_tiles() <= 4);
        let mut vj = vec![0.0; nao * nao];
        let mut vk = vec![0.0; nao * nao];
        assert!(tj.scatter(&mut vj, nao) && tk.scatter(&mut vk, nao));
        assert!(!tj.scatter(&mut vec![0.0; 4], 2));

        let off = shls.map(|s| ao_loc[s]);
        let mut vj_ref = vec![0.0; nao * nao];
        let mut vk_ref = vec![0.0; nao * nao];
        for a in 0..dims[0] {
            for b in 0..dims[1] {
                for c in 0..dims[2] {
                    for e in 0..dims[3] {
                        let v = 0.5 * eri[((a * dims[1] + b) * dims[2] + c) * dims[3] + e];
                        let (p, q, r, t) = (off[0] + a, off[1] + b, off[2] + c, off[3] + e);
                        let d = |x: usize, y: usize| dm_flat[x * nao + y];
                        vj_ref[p * nao + q] += 2.0 * v * d(r, t);
                        vj_ref[r * nao + t] += 2.0 * v * d(p, q);
                        vk_ref[p * nao + r] += v * d(q, t);
                        vk_ref[p * nao + t] += v * d(q, r);
                        vk_ref[q * nao + r] += v * d(p, t);
                        vk_ref[q * nao + t] += v * d(p, r);
                    }
                }
            }
        }
        let diff = |x: &[f64], y: &[f64]| x.iter().zip(y).map(|(a, b)| (a - b).abs()).fold(0.0, f64::max);
        assert!(diff(&vj, &vj_ref) < 1e-14);
        assert!(diff(&vk, &vk_ref) < 1e-14);
    }

    #[test]
    fn test_cache_accounting() {
        let accel = std::sync::Arc::new(HostAccelerator::default());
        let cint_data = two_s_atoms();
        let opt = VhfOpt::with_accelerator(&cint_data, EngineConfig::default(), accel.clone()).unwrap();
        assert_eq!(accel.live_caches(), 1);
        let before = accel.available_memory();
        drop(opt);
        assert_eq!(accel.live_caches(), 0);
        assert!(accel.available_memory() > before);
    }

    #[test]
    fn test_cache_out_of_memory() {
        let accel = std::sync::Arc::new(HostAccelerator::default().with_memory(16));
        let err = VhfOpt::with_accelerator(&two_s_atoms(), EngineConfig::default(), accel.clone()).unwrap_err();
        assert!(matches!(err, GvhfError::OutOfMemory { .. }));
        assert_eq!(accel.live_caches(), 0);
    }
}
