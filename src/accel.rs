//! Calling convention between the dispatch loops and an integral accelerator.
//!
//! Everything crossing the boundary is a typed view: flat slices with an explicit shape, checked
//! on construction and on every access.

use crate::host::ShellTiles;
use crate::prelude::*;

/// Closed set of kernel families an accelerator can be asked to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelClass {
    /// Four-center Coulomb/exchange contraction.
    Jk,
    /// Two-center auxiliary metric `(P|Q)`.
    Int2c2e,
    /// `(∇P|Q)`.
    Int2c2eIp1,
    /// Three-center `(ij|P)`.
    Int3c2e,
    /// `(∇i j|P)`.
    Int3c2eIp1,
    /// `(ij|∇P)`.
    Int3c2eIp2,
}

impl KernelClass {
    pub fn intor(&self) -> &'static str {
        match self {
            KernelClass::Jk => "int2e",
            KernelClass::Int2c2e => "int2c2e",
            KernelClass::Int2c2eIp1 => "int2c2e_ip1",
            KernelClass::Int3c2e => "int3c2e",
            KernelClass::Int3c2eIp1 => "int3c2e_ip1",
            KernelClass::Int3c2eIp2 => "int3c2e_ip2",
        }
    }

    pub fn ncomp(&self) -> usize {
        match self {
            KernelClass::Jk | KernelClass::Int2c2e | KernelClass::Int3c2e => 1,
            KernelClass::Int2c2eIp1 | KernelClass::Int3c2eIp1 | KernelClass::Int3c2eIp2 => 3,
        }
    }

    /// Largest angular momentum the reference device kernels are generated for.
    pub fn default_lmax(&self) -> usize {
        match self {
            KernelClass::Jk => 4,
            _ => 8,
        }
    }

    /// Whether the class is an auxiliary-only two-center integral.
    pub fn two_center(&self) -> bool {
        matches!(self, KernelClass::Int2c2e | KernelClass::Int2c2eIp1)
    }

    /// Whether the integral is unchanged when the two orbital indices are swapped.
    pub fn orbital_symmetric(&self) -> bool {
        !matches!(self, KernelClass::Int3c2eIp1)
    }

    /// Angular momentum class in chemists' notation, e.g. `(sp|dd)` or `(pp|f)`.
    pub fn label(ls: &[usize]) -> String {
        const SYMBOLS: &[u8] = b"spdfghiklmnoqrtuvwxyz";
        let sym = |l: usize| SYMBOLS.get(l).map(|&c| c as char).unwrap_or('?');
        let bra: String = ls.iter().take(2).map(|&l| sym(l)).collect();
        let ket: String = ls.iter().skip(2).map(|&l| sym(l)).collect();
        format!("({bra}|{ket})")
    }
}

/* #region views */

/// Read-only stack of square matrices, shape `(n_dm, n, n)`.
#[derive(Debug, Clone, Copy)]
pub struct DenseView<'a> {
    data: &'a [f64],
    shape: [usize; 3],
}

impl<'a> DenseView<'a> {
    pub fn new(data: &'a [f64], shape: [usize; 3]) -> GvhfResult<Self> {
        if data.len() != shape.iter().product::<usize>() {
            return Err(GvhfError::shape("dense view", &shape, &[data.len()]));
        }
        Ok(Self { data, shape })
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn get(&self, d: usize, i: usize, j: usize) -> f64 {
        let [_, n0, n1] = self.shape;
        self.data[(d * n0 + i) * n1 + j]
    }
}

/// Mutable stack of square matrices, shape `(n_dm, n, n)`.
#[derive(Debug)]
pub struct DenseViewMut<'a> {
    data: &'a mut [f64],
    shape: [usize; 3],
}

impl<'a> DenseViewMut<'a> {
    pub fn new(data: &'a mut [f64], shape: [usize; 3]) -> GvhfResult<Self> {
        if data.len() != shape.iter().product::<usize>() {
            return Err(GvhfError::shape("dense output view", &shape, &[data.len()]));
        }
        Ok(Self { data, shape })
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    /// Add sparse shell tiles; false when one falls outside the view.
    pub(crate) fn add_tiles(&mut self, tiles: &ShellTiles) -> bool {
        let [_, nao, _] = self.shape;
        tiles.scatter(self.data, nao)
    }
}

/// Output block of a fill kernel, shape `(comp, nk, ni, nj)`.
///
/// Indices are given in the global function numbering of the batch cache; `offsets` is the
/// global index of the first element along each of the `k`, `i`, `j` axes.
#[derive(Debug)]
pub struct BlockViewMut<'a> {
    data: &'a mut [f64],
    shape: [usize; 4],
    offsets: [usize; 3],
}

impl<'a> BlockViewMut<'a> {
    pub fn new(data: &'a mut [f64], shape: [usize; 4], offsets: [usize; 3]) -> GvhfResult<Self> {
        if data.len() != shape.iter().product::<usize>() {
            return Err(GvhfError::shape("block view", &shape, &[data.len()]));
        }
        Ok(Self { data, shape, offsets })
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn offsets(&self) -> [usize; 3] {
        self.offsets
    }

    /// Flat position of a global index, `None` outside the block.
    pub fn index(&self, c: usize, k: usize, i: usize, j: usize) -> Option<usize> {
        let [nc, nk, ni, nj] = self.shape;
        let [k0, i0, j0] = self.offsets;
        let (k, i, j) = (k.checked_sub(k0)?, i.checked_sub(i0)?, j.checked_sub(j0)?);
        (c < nc && k < nk && i < ni && j < nj).then(|| ((c * nk + k) * ni + i) * nj + j)
    }

    pub fn set(&mut self, c: usize, k: usize, i: usize, j: usize, value: f64) -> bool {
        match self.index(c, k, i, j) {
            Some(idx) => {
                self.data[idx] = value;
                true
            },
            None => false,
        }
    }
}

/* #endregion */

/// Half-open range of one significance bin inside a group pair, with its magnitude bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinRange {
    pub start: usize,
    pub end: usize,
    pub floor: f64,
}

/// Arguments of one J/K launch: one bin of `cp_ij` against one bin of `cp_kl`.
#[derive(Debug)]
pub struct JkLaunch<'a> {
    pub vj: Option<DenseViewMut<'a>>,
    pub vk: Option<DenseViewMut<'a>>,
    pub dms: DenseView<'a>,
    /// `log max |D|` per shell pair over all densities, shape `(nbas, nbas)`.
    pub dm_shl_log: &'a [f64],
    pub cp_ij: usize,
    pub cp_kl: usize,
    pub bin_ij: BinRange,
    pub bin_kl: BinRange,
    pub log_dm_cond: f64,
    pub log_cutoff: f64,
    pub omega: f64,
}

/// Arguments of one fill launch: orbital (or auxiliary) group pair `cp_ij` against auxiliary group `cp_aux`.
#[derive(Debug)]
pub struct FillLaunch<'a> {
    pub class: KernelClass,
    pub out: BlockViewMut<'a>,
    pub cp_ij: usize,
    pub cp_aux: usize,
    pub omega: f64,
}

/// A device able to hold a batch cache and run integral kernels against it.
///
/// Kernel entry points report failure through a non-zero status, as device runtimes do.
pub trait Accelerator: Send + Sync {
    type Resident: Send + Sync;

    fn name(&self) -> &str;

    /// Largest angular momentum the kernels of `class` handle.
    fn lmax(&self, class: KernelClass) -> usize;

    /// Free device memory in bytes.
    fn available_memory(&self) -> usize;

    /// Zero-initialized device buffer of `len` elements.
    fn alloc_device(&self, len: usize) -> GvhfResult<Vec<f64>>;

    fn init_basis_prod(&self, desc: &BasisProdDesc) -> GvhfResult<Self::Resident>;

    fn release_basis_prod(&self, resident: &mut Self::Resident);

    fn build_jk(&self, resident: &Self::Resident, launch: JkLaunch<'_>) -> i32;

    fn fill(&self, resident: &Self::Resident, launch: FillLaunch<'_>) -> i32;
}
