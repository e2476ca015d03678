//! Dense helpers: full libcint integral tensors for references and guesses, flat-buffer
//! conversions and comparisons.

use crate::prelude::*;

/// Full integral tensor of `intor` over all shells, row-major as PySCF lays it out.
///
/// ```norun
/// let ovlp = intor_row_major(&cint_data, "int1e_ovlp");
/// ```
pub fn intor_row_major(cint_data: &CInt, intor: &str) -> Tsr {
    let device = DeviceTsr::default();
    let (out, shape) = cint_data.integrate_row_major(intor, None, None).into();
    rt::asarray((out, shape.c(), &device))
}

/// Three-center integrals `(ij|P)` in row-major `(nao, nao, naux)`.
pub fn intor_3c2e_row_major(cint_data: &CInt, aux_cint_data: &CInt, intor: &str) -> Tsr {
    let device = DeviceTsr::default();
    let cints = [cint_data, cint_data, aux_cint_data];
    let (out, shape) = CInt::integrate_cross_row_major(intor, cints, None, None).into();
    rt::asarray((out, shape.c(), &device))
}

/// Row-major copy of the tensor elements.
pub fn tsr_to_vec(tsr: TsrView) -> Vec<f64> {
    tsr.reshape(-1).to_vec()
}

pub fn vec_to_tsr(data: Vec<f64>, shape: &[usize]) -> Tsr {
    let device = DeviceTsr::default();
    rt::asarray((data, shape.to_vec().c(), &device))
}

/// Largest elementwise deviation between two tensors of equal shape, infinite otherwise.
pub fn max_abs_diff(a: TsrView, b: TsrView) -> f64 {
    if a.shape() != b.shape() {
        return f64::INFINITY;
    }
    (&a - &b).abs().max_all()
}

/// Largest element magnitude.
pub fn max_abs(a: TsrView) -> f64 {
    a.abs().max_all()
}

/// Occupied coefficients `(nao, nocc)` and density of the core-Hamiltonian guess.
pub fn core_guess(cint_data: &CInt) -> (Tsr, Tsr) {
    let nao = cint_data.nao();
    let nocc = (cint_data.atom_charges().into_iter().sum::<f64>() / 2.0) as usize;
    let hcore = intor_row_major(cint_data, "int1e_kin") + intor_row_major(cint_data, "int1e_nuc");
    let ovlp = intor_row_major(cint_data, "int1e_ovlp");
    let (_, mo_coeff): (Tsr, Tsr) = rt::linalg::eigh((hcore.view(), ovlp.view())).into();
    let mo_occ = mo_coeff.i((.., ..nocc)).to_owned();
    let dm = 2.0_f64 * &mo_occ % mo_occ.t();
    (mo_occ, dm)
}
