//! Cartesian to real spherical-harmonic coefficients in libcint's convention.
//!
//! For `l <= 1` libcint evaluates both representations identically (p ordered as x, y, z),
//! so the map is the identity. For `l >= 2` the spherical function `m` (ordered `-l..=l`) is
//! the unit-sphere-normalized real solid harmonic expanded over Cartesian monomials.

use crate::shell::{cart_components, ncart, nsph};

fn binom(n: usize, k: usize) -> f64 {
    if k > n {
        return 0.0;
    }
    (0..k).fold(1.0, |acc, i| acc * (n - i) as f64 / (i + 1) as f64)
}

fn factorial(n: usize) -> f64 {
    (1..=n).fold(1.0, |acc, i| acc * i as f64)
}

/// Coefficient matrix of shape `(ncart(l), nsph(l))`, row-major.
pub fn cart2sph_coeff(l: usize) -> Vec<f64> {
    let nc = ncart(l);
    let ns = nsph(l);
    let mut c2s = vec![0.0; nc * ns];
    if l <= 1 {
        for i in 0..nc {
            c2s[i * ns + i] = 1.0;
        }
        return c2s;
    }

    let comps = cart_components(l);
    let index_of = |lx: usize, ly: usize| comps.iter().position(|c| c[0] == lx && c[1] == ly);
    let sphere = ((2 * l + 1) as f64 / (4.0 * std::f64::consts::PI)).sqrt();

    for (im, m) in (-(l as i64)..=(l as i64)).enumerate() {
        let am = m.unsigned_abs() as usize;
        let delta = if m == 0 { 2.0 } else { 1.0 };
        let norm = (2.0 * factorial(l + am) * factorial(l - am) / delta).sqrt() / (2.0_f64.powi(am as i32) * factorial(l));
        // w = 2v runs over even values for m >= 0 and odd values for m < 0
        let w_start = if m < 0 { 1 } else { 0 };
        for t in 0..=(l - am) / 2 {
            for u in 0..=t {
                for w in (w_start..=am).step_by(2) {
                    let sign_exp = t + (w - w_start) / 2;
                    let sign = if sign_exp % 2 == 0 { 1.0 } else { -1.0 };
                    let coef = sign
                        * 0.25_f64.powi(t as i32)
                        * binom(l, t)
                        * binom(l - t, am + t)
                        * binom(t, u)
                        * binom(am, w);
                    let ly = 2 * u + w;
                    let Some(lx) = (2 * t + am).checked_sub(ly) else { continue };
                    if let Some(ic) = index_of(lx, ly) {
                        c2s[ic * ns + im] += sphere * norm * coef;
                    }
                }
            }
        }
    }
    c2s
}
