//! Segment contraction of a generally contracted basis.
//!
//! The working basis is always Cartesian with one contraction column per shell. The transform
//! `T` of shape `(nao_work, nao)` relates the two representations: a density of the original
//! basis maps to `T · D · Tᵗ`, and an operator of the working basis maps back as `Tᵗ · X · T`.

use crate::cart2sph::cart2sph_coeff;
use crate::prelude::*;
use crate::shell::{atom_shell_runs, gto_norm, is_cartesian, make_ao_loc, ncart, nsph, shells_of, Shell};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractionMode {
    /// One shell per contraction column, sharing the primitive set.
    Replica,
    /// One shell per primitive; contraction coefficients move into the transform.
    Decontract,
}

/// Dense map of one original shell: working Cartesian functions × original Cartesian functions.
#[derive(Debug, Clone)]
struct ContractionBlock {
    nrow: usize,
    ncol: usize,
    data: Vec<f64>,
}

#[derive(Debug, Clone)]
struct AtomTemplate {
    shells: Vec<Shell>,
    /// Coefficient to append to `env` for a shell, replacing its `ptr_coeff`.
    new_coeff: Vec<Option<f64>>,
    blocks: Vec<ContractionBlock>,
}

type ShellSignature = (usize, usize, usize, usize, usize);
type TemplateKey = (ContractionMode, Vec<ShellSignature>);

/// Per-atom segment-contraction results keyed by the shell signatures of the atom.
///
/// Entries refer to positions in one basis' `env`; binding the cache to a different basis
/// evicts everything.
#[derive(Debug, Default)]
pub struct TemplateCache {
    basis_fingerprint: Option<u64>,
    templates: HashMap<TemplateKey, AtomTemplate>,
    hits: usize,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Number of atoms served from an existing template since the last eviction.
    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn clear(&mut self) {
        self.templates.clear();
        self.basis_fingerprint = None;
        self.hits = 0;
    }

    fn bind(&mut self, cint: &CInt) {
        let fingerprint = basis_fingerprint(cint);
        if self.basis_fingerprint != Some(fingerprint) {
            if !self.templates.is_empty() {
                log::debug!("basis changed, evicting {} contraction templates", self.templates.len());
            }
            self.clear();
            self.basis_fingerprint = Some(fingerprint);
        }
    }
}

fn basis_fingerprint(cint: &CInt) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    cint.bas.hash(&mut hasher);
    cint.atm.hash(&mut hasher);
    cint.env.iter().for_each(|x| x.to_bits().hash(&mut hasher));
    hasher.finish()
}

#[derive(Debug, Clone)]
pub struct CanonicalBasis {
    /// Working basis: Cartesian, segment contracted.
    pub cint: CInt,
    pub shells: Vec<Shell>,
    /// Shape `(nao_work, nao)`.
    pub transform: Tsr,
    pub nao: usize,
    pub mode: ContractionMode,
}

impl CanonicalBasis {
    pub fn nao_work(&self) -> usize {
        self.transform.shape()[0]
    }

    pub fn nbas(&self) -> usize {
        self.shells.len()
    }
}

fn template_for_atom(shells: &[Shell], mode: ContractionMode, env: &[f64]) -> AtomTemplate {
    let mut out_shells = vec![];
    let mut new_coeff = vec![];
    let mut blocks = vec![];
    for shl in shells {
        let nf = ncart(shl.l);
        let ncol = shl.nctr * nf;
        if shl.nctr == 1 {
            out_shells.push(*shl);
            new_coeff.push(None);
            blocks.push(identity_block(nf));
            continue;
        }
        match mode {
            ContractionMode::Replica => {
                for c in 0..shl.nctr {
                    out_shells.push(Shell { nctr: 1, ptr_coeff: shl.ptr_coeff + c * shl.nprim, ..*shl });
                    new_coeff.push(None);
                }
                blocks.push(identity_block(ncol));
            },
            ContractionMode::Decontract => {
                let nrow = shl.nprim * nf;
                let mut data = vec![0.0; nrow * ncol];
                for p in 0..shl.nprim {
                    let alpha = env[shl.ptr_exp + p];
                    let norm = gto_norm(shl.l, alpha);
                    for c in 0..shl.nctr {
                        let value = shl.coeff(env, p, c) / norm;
                        for f in 0..nf {
                            data[(p * nf + f) * ncol + c * nf + f] = value;
                        }
                    }
                    out_shells.push(Shell { nprim: 1, nctr: 1, ptr_exp: shl.ptr_exp + p, ..*shl });
                    new_coeff.push(Some(norm));
                }
                blocks.push(ContractionBlock { nrow, ncol, data });
            },
        }
    }
    AtomTemplate { shells: out_shells, new_coeff, blocks }
}

fn identity_block(n: usize) -> ContractionBlock {
    let mut data = vec![0.0; n * n];
    (0..n).for_each(|i| data[i * n + i] = 1.0);
    ContractionBlock { nrow: n, ncol: n, data }
}

/// Segment-contract `cint`, reusing per-atom templates from `cache`.
pub fn canonicalize(cint: &CInt, mode: ContractionMode, cache: &mut TemplateCache) -> GvhfResult<CanonicalBasis> {
    let cart = is_cartesian(cint)?;
    let shells = shells_of(cint)?;
    cache.bind(cint);

    let mut work = cint.clone();
    work.cint_type = CIntType::Cartesian;

    let mut work_shells = Vec::with_capacity(shells.len());
    let mut blocks = Vec::with_capacity(shells.len());
    for (atom, s0, s1) in atom_shell_runs(&shells) {
        let key: TemplateKey =
            (mode, shells[s0..s1].iter().map(|s| (s.l, s.nprim, s.nctr, s.ptr_exp, s.ptr_coeff)).collect());
        let template = match cache.templates.get(&key) {
            Some(template) => {
                cache.hits += 1;
                template.clone()
            },
            None => {
                let template = template_for_atom(&shells[s0..s1], mode, &cint.env);
                cache.templates.insert(key, template.clone());
                template
            },
        };
        for (shl, coeff) in template.shells.iter().zip(&template.new_coeff) {
            let mut shl = Shell { atom, ..*shl };
            if let Some(coeff) = coeff {
                shl.ptr_coeff = work.env.len();
                work.env.push(*coeff);
            }
            work_shells.push(shl);
        }
        blocks.extend(template.blocks);
    }
    work.bas = work_shells.iter().map(Shell::to_bas).collect();

    let nao_work: usize = blocks.iter().map(|b| b.nrow).sum();
    let nao = *make_ao_loc(&shells, cart).last().unwrap_or(&0);
    let mut data = vec![0.0; nao_work * nao];
    let (mut row0, mut col0) = (0, 0);
    for (shl, block) in shells.iter().zip(&blocks) {
        let block = if cart { block.clone() } else { apply_cart2sph(block, shl) };
        for r in 0..block.nrow {
            let dst = (row0 + r) * nao + col0;
            data[dst..dst + block.ncol].copy_from_slice(&block.data[r * block.ncol..(r + 1) * block.ncol]);
        }
        row0 += block.nrow;
        col0 += block.ncol;
    }

    log::debug!(
        "segment contraction ({mode:?}): {} shells -> {} shells, nao {nao} -> {nao_work}",
        shells.len(),
        work_shells.len()
    );

    let transform = crate::util::vec_to_tsr(data, &[nao_work, nao]);
    Ok(CanonicalBasis { cint: work, shells: work_shells, transform, nao, mode })
}

/// Right-multiply a contraction block by the Cartesian-to-spherical map of each contraction column.
fn apply_cart2sph(block: &ContractionBlock, shl: &Shell) -> ContractionBlock {
    let (nc, ns) = (ncart(shl.l), nsph(shl.l));
    let c2s = cart2sph_coeff(shl.l);
    let ncol = shl.nctr * ns;
    let mut data = vec![0.0; block.nrow * ncol];
    for r in 0..block.nrow {
        for c in 0..shl.nctr {
            for m in 0..ns {
                data[r * ncol + c * ns + m] =
                    (0..nc).map(|f| block.data[r * block.ncol + c * nc + f] * c2s[f * ns + m]).sum::<f64>();
            }
        }
    }
    ContractionBlock { nrow: block.nrow, ncol, data }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fixtures::*;
    use crate::util::{intor_row_major, max_abs_diff};

    fn check_overlap_round_trip(cint_data: &CInt, mode: ContractionMode) -> CanonicalBasis {
        let mut cache = TemplateCache::new();
        let canonical = canonicalize(cint_data, mode, &mut cache).unwrap();
        assert!(canonical.shells.iter().all(|s| s.nctr == 1));

        let ovlp = intor_row_major(cint_data, "int1e_ovlp");
        let ovlp_work = intor_row_major(&canonical.cint, "int1e_ovlp");
        let t = &canonical.transform;
        let ovlp_back = (t.t() % &ovlp_work) % t;
        let diff = max_abs_diff(ovlp_back.view(), ovlp.view());
        println!("overlap round trip ({mode:?}): {diff:e}");
        assert!(diff < 1e-10);
        canonical
    }

    #[test]
    fn test_round_trip_h2o_tzvp() {
        let cint_data = init_h2o_def2_tzvp();
        check_overlap_round_trip(&cint_data, ContractionMode::Replica);
        check_overlap_round_trip(&cint_data, ContractionMode::Decontract);
    }

    #[test]
    fn test_round_trip_general_contraction() {
        for cart in [false, true] {
            let cint_data = general_contracted_pair(cart);
            let replica = check_overlap_round_trip(&cint_data, ContractionMode::Replica);
            let decontract = check_overlap_round_trip(&cint_data, ContractionMode::Decontract);
            // s: 3 prim x 2 ctr, p: 2 prim x 2 ctr, d: 1 x 1 on each atom
            assert_eq!(replica.nbas(), 2 * (2 + 2 + 1));
            assert_eq!(decontract.nbas(), 2 * (3 + 2 + 1));
            assert!(decontract.shells.iter().all(|s| s.nprim == 1));
        }
    }

    #[test]
    fn test_template_cache_reuse_and_eviction() {
        let cint_data = general_contracted_pair(false);
        let mut cache = TemplateCache::new();
        canonicalize(&cint_data, ContractionMode::Replica, &mut cache).unwrap();
        // both atoms share one exponent signature
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.hits(), 1);

        canonicalize(&cint_data, ContractionMode::Decontract, &mut cache).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.hits(), 2);

        // a second decontraction from cached templates still carries its own coefficients
        let again = canonicalize(&cint_data, ContractionMode::Decontract, &mut cache).unwrap();
        assert_eq!(cache.hits(), 4);
        assert!(again.shells.iter().all(|s| s.ptr_coeff < again.cint.env.len()));

        let other = init_h2o_def2_tzvp();
        canonicalize(&other, ContractionMode::Replica, &mut cache).unwrap();
        // two hydrogens share a template, oxygen has its own
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_reject_before_build() {
        let mut cint_data = general_contracted_pair(false);
        cint_data.bas[2][crate::shell::NCTR_OF] = 0;
        let mut cache = TemplateCache::new();
        let err = canonicalize(&cint_data, ContractionMode::Replica, &mut cache).unwrap_err();
        assert!(err.is_configuration());
        assert!(cache.is_empty());
    }
}
