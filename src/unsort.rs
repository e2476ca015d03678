//! Maps between the sorted working basis and the caller's basis.
//!
//! With `T_s` the rows of the canonical transform gathered into sorted order (see
//! [`take_rows`]), densities go forward as `T_s · D · T_sᵗ` and operators come back as
//! `T_sᵗ · X · T_s`. The sort permutation and its inverse are both carried by `T_s`.

use crate::prelude::*;

/// Gather along the first axis, `out[a] = x[ao_idx[a]]`. `ao_idx` is a permutation of the rows.
pub fn take_rows(x: TsrView, ao_idx: &[usize]) -> Tsr {
    let mut out = x.to_owned();
    for (a, &ia) in ao_idx.iter().enumerate() {
        out.i_mut(a).assign(x.i(ia));
    }
    out
}

/// `T_s · D · T_sᵗ` for each density of `(n_dm, nao, nao)`.
pub fn to_working(dms: TsrView, t_s: &Tsr) -> Tsr {
    let n_dm = dms.shape()[0];
    let nw = t_s.shape()[0];
    let device = t_s.device().clone();
    let mut out: Tsr = rt::zeros(([n_dm, nw, nw], &device));
    for d in 0..n_dm {
        out.i_mut(d).assign(t_s % dms.i(d) % t_s.t());
    }
    out
}

/// `T_sᵗ · X · T_s` for each matrix of `(n_mat, nao_work, nao_work)`.
pub fn to_original(x: TsrView, t_s: &Tsr) -> Tsr {
    let n_mat = x.shape()[0];
    let nao = t_s.shape()[1];
    let device = t_s.device().clone();
    let mut out: Tsr = rt::zeros(([n_mat, nao, nao], &device));
    for m in 0..n_mat {
        out.i_mut(m).assign(t_s.t() % x.i(m) % t_s);
    }
    out
}

/// `X + Xᵗ` for each matrix of a `(n_mat, n, n)` stack.
pub fn symmetrize(x: &Tsr) -> Tsr {
    x + x.swapaxes(1, 2)
}

/// Rows of a `(nrow_work, m)` matrix, or a vector, from sorted working order to the caller's
/// functions, `T_sᵗ · X`.
pub fn rows_to_original(x_s: TsrView, t_s: &Tsr) -> Tsr {
    t_s.t() % x_s
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::util::{max_abs_diff, tsr_to_vec, vec_to_tsr};

    fn identity(n: usize) -> Tsr {
        let data = (0..n * n).map(|x| if x % (n + 1) == 0 { 1.0 } else { 0.0 }).collect();
        vec_to_tsr(data, &[n, n])
    }

    #[test]
    fn test_sorted_transform_permutes() {
        let ao_idx = [2, 0, 3, 1];
        let t_s = take_rows(identity(4).view(), &ao_idx);
        let x: Vec<f64> = (0..32).map(|v| v as f64).collect();
        let x = vec_to_tsr(x, &[2, 4, 4]);

        let x_s = to_working(x.view(), &t_s);
        let flat = tsr_to_vec(x_s.view());
        // x_s[m, a, b] = x[m, ao_idx[a], ao_idx[b]]
        assert_eq!(flat[1], 2.0 * 4.0);
        assert_eq!(flat[16 + 4 + 2], 16.0 + 3.0);
        assert_eq!(max_abs_diff(to_original(x_s.view(), &t_s).view(), x.view()), 0.0);
    }

    #[test]
    fn test_symmetrize() {
        let x = vec_to_tsr(vec![1.0, 2.0, 3.0, 4.0], &[1, 2, 2]);
        assert_eq!(tsr_to_vec(symmetrize(&x).view()), vec![2.0, 5.0, 5.0, 8.0]);
    }

    #[test]
    fn test_rows_to_original() {
        // two working rows built from one caller row with weights 0.5 and 2
        let t_s = vec_to_tsr(vec![0.5, 2.0], &[2, 1]);
        let x_s = vec_to_tsr(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let x = rows_to_original(x_s.view(), &t_s);
        assert_eq!(x.shape(), &[1, 3]);
        assert_eq!(tsr_to_vec(x.view()), vec![8.5, 11.0, 13.5]);

        let v_s = vec_to_tsr(vec![1.0, 1.0], &[2]);
        assert_eq!(tsr_to_vec(rows_to_original(v_s.view(), &t_s).view()), vec![2.5]);
    }
}
