pub mod prelude;

pub mod accel;
pub mod cache;
pub mod canonical;
pub mod cart2sph;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fallback;
pub mod host;
pub mod int3c2e;
pub mod memory;
pub mod partition;
pub mod screening;
pub mod shell;
pub mod sort;
pub mod unsort;
pub mod util;
pub mod vhfopt;

#[cfg(test)]
mod fixtures;

#[test]
fn playground_rhf_with_jk() {
    use crate::prelude::*;
    use crate::util::*;

    let _ = env_logger::builder().is_test(true).try_init();
    let cint_data = init_h2o_def2_tzvp();
    let nocc = (cint_data.atom_charges().into_iter().sum::<f64>() / 2.0) as usize;
    let hcore = intor_row_major(&cint_data, "int1e_kin") + intor_row_major(&cint_data, "int1e_nuc");
    let ovlp = intor_row_major(&cint_data, "int1e_ovlp");
    let opt = VhfOpt::new(&cint_data, EngineConfig::default()).unwrap();

    let (_, mut dm) = core_guess(&cint_data);
    for _ in 0..12 {
        let jk = opt.get_jk(&dm, true, true).unwrap();
        let fock = &hcore + jk.vj.unwrap() - 0.5_f64 * jk.vk.unwrap();
        let (_, mo_coeff): (Tsr, Tsr) = rt::linalg::eigh((fock.view(), ovlp.view())).into();
        dm = 2.0_f64 * mo_coeff.i((.., ..nocc)) % mo_coeff.i((.., ..nocc)).t();
    }

    // dense reference for the final density
    let int2e = intor_row_major(&cint_data, "int2e");
    let jk = opt.get_jk(&dm, true, true).unwrap();
    let fock = &hcore + jk.vj.unwrap() - 0.5_f64 * jk.vk.unwrap();
    let fock_ref = &hcore + ((1.0_f64 * &int2e - 0.5_f64 * int2e.swapaxes(1, 2)) * &dm).sum_axes([-1, -2]);
    let diff = max_abs_diff(fock.view(), fock_ref.view());
    println!("max |F - F_ref| = {diff:.3e}");
    assert!(diff < 1e-9);

    let e_elec = 0.5 * (&dm * (&hcore + &fock)).sum();
    println!("Electronic energy after 12 iterations: {e_elec}");
}

#[test]
fn playground_ri_int3c2e() {
    use crate::prelude::*;
    use crate::util::*;

    let _ = env_logger::builder().is_test(true).try_init();
    let cint_data = init_h2o_def2_tzvp();
    let aux_cint_data = init_h2o_def2_jk();
    let opt = Int3c2eOpt::new(&cint_data, &aux_cint_data, EngineConfig::density_fitting(), true).unwrap();

    let int3c2e = opt.get_int3c2e().unwrap();
    let reference = intor_3c2e_row_major(&cint_data, &aux_cint_data, "int3c2e");
    let diff = max_abs_diff(int3c2e.view(), reference.transpose([2, 0, 1]));
    println!("max |(P|ij) - ref| = {diff:.3e}");
    assert!(diff < 1e-10);

    let int2c2e = opt.get_int2c2e().unwrap();
    let diff = max_abs_diff(int2c2e.view(), intor_row_major(&aux_cint_data, "int2c2e").view());
    assert!(diff < 1e-10);

    let (mo_occ, dm) = core_guess(&cint_data);
    let wjk = opt.get_int3c2e_wjk(&dm, &mo_occ).unwrap();
    println!("wj norm {:.6}, wk placement {:?}", wjk.wj.l2_norm(), wjk.placement);
}
