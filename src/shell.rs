//! Shell records of a libcint basis and the small amount of angular bookkeeping around them.

use crate::prelude::*;

/* #region libcint slots */

pub const CHARGE_OF: usize = 0;
pub const PTR_COORD: usize = 1;
pub const NUC_MOD_OF: usize = 2;
pub const PTR_ZETA: usize = 3;

pub const ATOM_OF: usize = 0;
pub const ANG_OF: usize = 1;
pub const NPRIM_OF: usize = 2;
pub const NCTR_OF: usize = 3;
pub const KAPPA_OF: usize = 4;
pub const PTR_EXP: usize = 5;
pub const PTR_COEFF: usize = 6;

pub const PTR_RANGE_OMEGA: usize = 8;
pub const PTR_ENV_START: usize = 20;

/* #endregion */

/// One shell of a libcint basis, with pointers into the owning `env`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shell {
    pub atom: usize,
    pub l: usize,
    pub nprim: usize,
    pub nctr: usize,
    pub kappa: i32,
    pub ptr_exp: usize,
    pub ptr_coeff: usize,
}

impl Shell {
    /// Decode one `bas` record, rejecting records later stages cannot handle.
    pub fn from_bas(ish: usize, bas: &[i32; 8], natm: usize, env_len: usize) -> GvhfResult<Self> {
        let field = |slot: usize, name: &str| -> GvhfResult<usize> {
            usize::try_from(bas[slot]).map_err(|_| GvhfError::invalid_shell(ish, format!("negative {name} ({})", bas[slot])))
        };
        let atom = field(ATOM_OF, "atom index")?;
        let l = field(ANG_OF, "angular momentum")?;
        let nprim = field(NPRIM_OF, "primitive count")?;
        let nctr = field(NCTR_OF, "contraction count")?;
        let ptr_exp = field(PTR_EXP, "exponent pointer")?;
        let ptr_coeff = field(PTR_COEFF, "coefficient pointer")?;

        if nprim == 0 {
            return Err(GvhfError::invalid_shell(ish, "primitive count must be positive"));
        }
        if nctr == 0 {
            return Err(GvhfError::invalid_shell(ish, "contraction count must be positive"));
        }
        if atom >= natm {
            return Err(GvhfError::invalid_shell(ish, format!("atom index {atom} out of {natm} atoms")));
        }
        if ptr_exp + nprim > env_len || ptr_coeff + nprim * nctr > env_len {
            return Err(GvhfError::invalid_shell(ish, "exponent or coefficient pointer outside env"));
        }
        Ok(Shell { atom, l, nprim, nctr, kappa: bas[KAPPA_OF], ptr_exp, ptr_coeff })
    }

    pub fn to_bas(&self) -> [i32; 8] {
        let mut bas = [0; 8];
        bas[ATOM_OF] = self.atom as i32;
        bas[ANG_OF] = self.l as i32;
        bas[NPRIM_OF] = self.nprim as i32;
        bas[NCTR_OF] = self.nctr as i32;
        bas[KAPPA_OF] = self.kappa;
        bas[PTR_EXP] = self.ptr_exp as i32;
        bas[PTR_COEFF] = self.ptr_coeff as i32;
        bas
    }

    pub fn ncart(&self) -> usize {
        ncart(self.l)
    }

    /// Number of functions this shell contributes, including every contraction column.
    pub fn nao(&self, cart: bool) -> usize {
        self.nctr * if cart { ncart(self.l) } else { nsph(self.l) }
    }

    /// Coefficient of primitive `p` in contraction column `c` (libcint stores columns primitive-fastest).
    pub fn coeff(&self, env: &[f64], p: usize, c: usize) -> f64 {
        env[self.ptr_coeff + c * self.nprim + p]
    }
}

pub fn ncart(l: usize) -> usize {
    (l + 1) * (l + 2) / 2
}

pub fn nsph(l: usize) -> usize {
    2 * l + 1
}

/// Decode and validate every shell of a basis.
pub fn shells_of(cint: &CInt) -> GvhfResult<Vec<Shell>> {
    let natm = cint.atm.len();
    let env_len = cint.env.len();
    cint.bas.iter().enumerate().map(|(ish, bas)| Shell::from_bas(ish, bas, natm, env_len)).collect()
}

/// Function offsets per shell, with a trailing total.
pub fn make_ao_loc(shells: &[Shell], cart: bool) -> Vec<usize> {
    let mut ao_loc = Vec::with_capacity(shells.len() + 1);
    ao_loc.push(0);
    for shl in shells {
        ao_loc.push(ao_loc.last().unwrap_or(&0) + shl.nao(cart));
    }
    ao_loc
}

/// Contiguous runs of shells sharing one atom, as `(atom, shell_start, shell_end)`.
pub fn atom_shell_runs(shells: &[Shell]) -> Vec<(usize, usize, usize)> {
    let mut runs: Vec<(usize, usize, usize)> = vec![];
    for (ish, shl) in shells.iter().enumerate() {
        match runs.last_mut() {
            Some(run) if run.0 == shl.atom => run.2 = ish + 1,
            _ => runs.push((shl.atom, ish, ish + 1)),
        }
    }
    runs
}

/// Cartesian exponents `(lx, ly, lz)` of a shell in libcint order (`lx` descending, then `ly`).
pub fn cart_components(l: usize) -> Vec<[usize; 3]> {
    let mut comps = Vec::with_capacity(ncart(l));
    for lx in (0..=l).rev() {
        for ly in (0..=l - lx).rev() {
            comps.push([lx, ly, l - lx - ly]);
        }
    }
    comps
}

/// Γ(l + 3/2), the only Gamma values radial normalization needs.
fn gamma_l_three_halves(l: usize) -> f64 {
    (0..=l).fold(std::f64::consts::PI.sqrt(), |acc, k| acc * (k as f64 + 0.5))
}

/// Normalization of a primitive radial function `r^l exp(-alpha r^2)`.
pub fn gto_norm(l: usize, alpha: f64) -> f64 {
    // ∫ r^(2l+2) exp(-2 alpha r^2) dr = Γ(l + 3/2) / (2 (2 alpha)^(l + 3/2))
    let n = l as f64 + 1.5;
    let integral = gamma_l_three_halves(l) / (2.0 * (2.0 * alpha).powf(n));
    1.0 / integral.sqrt()
}

/// Whether the basis is evaluated over Cartesian functions.
pub fn is_cartesian(cint: &CInt) -> GvhfResult<bool> {
    match cint.cint_type {
        CIntType::Cartesian => Ok(true),
        CIntType::Spheric => Ok(false),
        _ => Err(GvhfError::unsupported("spinor basis representation")),
    }
}

/// Join two bases into one libcint record set, shifting atom indices and env pointers of the second.
pub fn conc_cint(a: &CInt, b: &CInt) -> CInt {
    let mut tot = a.clone();
    let natm_a = a.atm.len() as i32;
    let env_off = a.env.len() as i32;
    tot.atm.extend(b.atm.iter().map(|atm| {
        let mut atm = *atm;
        atm[PTR_COORD] += env_off;
        if atm[PTR_ZETA] > 0 {
            atm[PTR_ZETA] += env_off;
        }
        atm
    }));
    tot.bas.extend(b.bas.iter().map(|bas| {
        let mut bas = *bas;
        bas[ATOM_OF] += natm_a;
        bas[PTR_EXP] += env_off;
        bas[PTR_COEFF] += env_off;
        bas
    }));
    tot.env.extend_from_slice(&b.env);
    tot
}

/// One normalized s Gaussian of exponent `zeta` on every atom of `cint`, `∫ φ = 1`.
///
/// With a very large `zeta` the three-center integrals over this basis stand in for point
/// charges at the nuclei.
pub fn point_charge_basis(cint: &CInt, zeta: f64) -> CInt {
    let mut fake = cint.clone();
    let ptr = fake.env.len();
    let coeff = 2.0 * zeta.powf(1.5) / std::f64::consts::PI;
    fake.env.extend_from_slice(&[zeta, coeff]);
    fake.bas = (0..cint.atm.len())
        .map(|atom| Shell { atom, l: 0, nprim: 1, nctr: 1, kappa: 0, ptr_exp: ptr, ptr_coeff: ptr + 1 }.to_bas())
        .collect();
    fake
}
