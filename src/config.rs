use crate::prelude::*;

/// Pair-list bin size; one kernel early-exit test covers this many shell pairs.
pub const BINSIZE: usize = 128;

/// Fraction of available accelerator memory a single intermediate may occupy before it is
/// staged in host pinned storage.
pub const MEM_SAFETY_FRACTION: f64 = 0.4;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Shell pairs with Schwarz estimate at or below this value are discarded.
    pub cutoff: f64,
    /// Integral evaluation threshold of the direct-SCF density gate.
    pub direct_scf_tol: f64,
    pub bin_size: usize,
    /// Target number of Cartesian functions per orbital group.
    pub group_size: usize,
    /// Target number of Cartesian functions per auxiliary group.
    pub group_size_aux: usize,
    pub mode: ContractionMode,
    /// Retain the upper triangle of diagonal group blocks.
    pub diag_block_with_triu: bool,
    /// Range-separation parameter; 0 for the full Coulomb operator.
    pub omega: f64,
    pub mem_fraction: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cutoff: 1.0e-13,
            direct_scf_tol: 1.0e-13,
            bin_size: BINSIZE,
            group_size: 256,
            group_size_aux: 256,
            mode: ContractionMode::Replica,
            diag_block_with_triu: false,
            omega: 0.0,
            mem_fraction: MEM_SAFETY_FRACTION,
        }
    }
}

impl EngineConfig {
    /// Defaults of the density-fitting engine: both triangles of diagonal blocks are kept.
    pub fn density_fitting() -> Self {
        Self { diag_block_with_triu: true, ..Self::default() }
    }

    pub fn check(&self) -> GvhfResult<()> {
        if !(self.cutoff > 0.0) || !self.cutoff.is_finite() {
            return Err(GvhfError::config(format!("cutoff must be positive and finite, found {}", self.cutoff)));
        }
        if !(self.direct_scf_tol > 0.0) || !self.direct_scf_tol.is_finite() {
            return Err(GvhfError::config(format!("direct_scf_tol must be positive, found {}", self.direct_scf_tol)));
        }
        if self.bin_size == 0 {
            return Err(GvhfError::config("bin_size must be non-zero"));
        }
        if self.group_size == 0 || self.group_size_aux == 0 {
            return Err(GvhfError::config("group sizes must be non-zero"));
        }
        if !(self.mem_fraction > 0.0 && self.mem_fraction <= 1.0) {
            return Err(GvhfError::config(format!("mem_fraction must lie in (0, 1], found {}", self.mem_fraction)));
        }
        Ok(())
    }
}
