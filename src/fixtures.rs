//! Small hand-built molecules for tests.

use crate::prelude::*;
use crate::shell::*;

#[derive(Clone)]
pub struct ShellSpec {
    pub atom: usize,
    pub l: usize,
    pub exps: Vec<f64>,
    /// One coefficient vector per contraction column.
    pub coeffs: Vec<Vec<f64>>,
}

impl ShellSpec {
    /// Single normalized primitive.
    pub fn primitive(atom: usize, l: usize, exp: f64) -> Self {
        ShellSpec { atom, l, exps: vec![exp], coeffs: vec![vec![gto_norm(l, exp)]] }
    }
}

/// Assemble libcint records; shells with identical exponents and coefficients share `env` storage.
pub fn build_cint(coords: &[[f64; 3]], charges: &[i32], shells: &[ShellSpec], cart: bool) -> CInt {
    let mut env = vec![0.0; PTR_ENV_START];
    let mut atm = vec![];
    for (coord, &charge) in coords.iter().zip(charges) {
        let ptr = env.len() as i32;
        env.extend_from_slice(coord);
        env.push(0.0);
        atm.push([charge, ptr, 1, ptr + 3, 0, 0]);
    }

    let mut written: Vec<(usize, usize)> = vec![];
    let mut bas = vec![];
    for (ish, def) in shells.iter().enumerate() {
        let nprim = def.exps.len();
        let reuse = written.iter().find(|&&(jsh, _)| {
            let other = &shells[jsh];
            other.l == def.l && other.exps == def.exps && other.coeffs == def.coeffs
        });
        let ptr_exp = match reuse {
            Some(&(_, ptr)) => ptr,
            None => {
                let ptr = env.len();
                env.extend_from_slice(&def.exps);
                def.coeffs.iter().for_each(|c| env.extend_from_slice(c));
                written.push((ish, ptr));
                ptr
            },
        };
        let shl = Shell {
            atom: def.atom,
            l: def.l,
            nprim,
            nctr: def.coeffs.len(),
            kappa: 0,
            ptr_exp,
            ptr_coeff: ptr_exp + nprim,
        };
        bas.push(shl.to_bas());
    }

    let mut cint_data = init_h2o_def2_tzvp();
    cint_data.atm = atm;
    cint_data.bas = bas;
    cint_data.env = env;
    cint_data.cint_type = if cart { CIntType::Cartesian } else { CIntType::Spheric };
    cint_data
}

/// Two hydrogen-like centres with one uncontracted s shell each.
pub fn two_s_atoms() -> CInt {
    let shells = [ShellSpec::primitive(0, 0, 0.8), ShellSpec::primitive(1, 0, 0.5)];
    build_cint(&[[0.0, 0.0, 0.0], [0.0, 0.0, 1.4]], &[1, 1], &shells, false)
}

fn general_shells(atom: usize) -> Vec<ShellSpec> {
    vec![
        ShellSpec {
            atom,
            l: 0,
            exps: vec![12.0, 2.4, 0.6],
            coeffs: vec![vec![0.3, 0.5, 0.4], vec![-0.1, -0.2, 0.9]],
        },
        ShellSpec { atom, l: 1, exps: vec![3.1, 0.7], coeffs: vec![vec![0.6, 0.5], vec![0.2, -0.8]] },
        ShellSpec::primitive(atom, 2, 0.9),
    ]
}

/// Two identical atoms carrying general contractions for s and p and a d polarization shell.
pub fn general_contracted_pair(cart: bool) -> CInt {
    let shells = [general_shells(0), general_shells(1)].concat();
    build_cint(&[[0.0, 0.0, -0.7], [0.1, 0.2, 0.7]], &[3, 3], &shells, cart)
}

/// A few s and p shells over three centres plus one shell of angular momentum `l_high` on the last.
pub fn mixed_with_high_l(l_high: usize) -> CInt {
    let shells = vec![
        ShellSpec::primitive(0, 0, 3.0),
        ShellSpec::primitive(0, 0, 0.7),
        ShellSpec::primitive(0, 1, 1.1),
        ShellSpec::primitive(1, 0, 1.5),
        ShellSpec::primitive(1, 1, 0.9),
        ShellSpec::primitive(2, 0, 0.6),
        ShellSpec::primitive(2, l_high, 1.3),
    ];
    build_cint(&[[0.0, 0.0, 0.0], [0.0, 1.2, 0.8], [-0.9, 0.3, -0.5]], &[2, 2, 2], &shells, false)
}

/// A small auxiliary basis on the centres of [`mixed_with_high_l`].
pub fn small_aux() -> CInt {
    let shells = vec![
        ShellSpec::primitive(0, 0, 2.0),
        ShellSpec::primitive(0, 1, 1.0),
        ShellSpec::primitive(1, 0, 1.6),
        ShellSpec::primitive(1, 2, 0.8),
        ShellSpec::primitive(2, 0, 0.9),
        ShellSpec::primitive(2, 1, 1.2),
    ];
    build_cint(&[[0.0, 0.0, 0.0], [0.0, 1.2, 0.8], [-0.9, 0.3, -0.5]], &[2, 2, 2], &shells, false)
}

/// Symmetric test density: `C Cᵗ` for a deterministic pseudo-random `C`.
pub fn symmetric_density(nao: usize, nocc: usize, seed: u64) -> Tsr {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    let data: Vec<f64> = (0..nao * nocc)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 11) as f64 / (1u64 << 53) as f64) - 0.5
        })
        .collect();
    let c = crate::util::vec_to_tsr(data, &[nao, nocc]);
    &c % c.t()
}

/// Four well separated atoms whose shells differ in angular momentum or primitive count, so each
/// atom lands in its own shell group.
pub fn four_distinct_atoms() -> CInt {
    let shells = [
        ShellSpec::primitive(0, 0, 0.9),
        ShellSpec::primitive(1, 1, 0.8),
        ShellSpec { atom: 2, l: 0, exps: vec![2.0, 0.5], coeffs: vec![vec![0.4, 0.7]] },
        ShellSpec::primitive(3, 2, 1.0),
    ];
    let coords = [[0.0, 0.0, 0.0], [0.0, 0.0, 3.0], [0.0, 3.0, 0.0], [3.0, 0.0, 0.0]];
    build_cint(&coords, &[1, 1, 1, 1], &shells, false)
}

/// Four identical uncontracted s atoms on a line, all in one shell group.
pub fn four_s_atoms(exp: f64, spacing: f64) -> CInt {
    let shells: Vec<ShellSpec> = (0..4).map(|a| ShellSpec::primitive(a, 0, exp)).collect();
    let coords: Vec<[f64; 3]> = (0..4).map(|a| [0.0, 0.0, spacing * a as f64]).collect();
    build_cint(&coords, &[1, 1, 1, 1], &shells, false)
}

/// Density with blocks only on the diagonal: `D_ij = 0` unless functions `i` and `j` sit in the
/// same block of `blocks`.
pub fn block_diagonal_density(dm: &Tsr, blocks: &[usize]) -> Tsr {
    let mut out = dm.to_owned();
    let mut start = 0;
    for &len in blocks {
        let end = start + len;
        out.i_mut((start..end, ..start)).fill(0.0);
        out.i_mut((start..end, end..)).fill(0.0);
        start = end;
    }
    out
}

/// Call counts seen by a [`RecordingFallback`].
#[derive(Debug, Default)]
pub struct FallbackCalls {
    jk: std::sync::atomic::AtomicUsize,
    fill: std::sync::atomic::AtomicUsize,
}

impl FallbackCalls {
    pub fn jks(&self) -> usize {
        self.jk.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn fills(&self) -> usize {
        self.fill.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// [`HostFallback`] that counts how often it is asked for work.
#[derive(Debug, Default)]
pub struct RecordingFallback {
    pub calls: std::sync::Arc<FallbackCalls>,
}

impl FallbackEvaluator for RecordingFallback {
    fn name(&self) -> &str {
        "recording fallback"
    }

    fn jk(
        &self,
        desc: &BasisProdDesc,
        exclude: std::ops::Range<usize>,
        dms: DenseView<'_>,
        vj: Option<&mut [f64]>,
        vk: Option<&mut [f64]>,
        omega: f64,
    ) -> GvhfResult<()> {
        self.calls.jk.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        HostFallback.jk(desc, exclude, dms, vj, vk, omega)
    }

    fn fill(&self, desc: &BasisProdDesc, launch: FillLaunch<'_>) -> GvhfResult<()> {
        self.calls.fill.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        HostFallback.fill(desc, launch)
    }
}
