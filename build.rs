//! Link the OpenBLAS back end when the `use_openblas` feature is on.

#![allow(unused)]

use std::path::PathBuf;

const PATH_VARS: [&str; 3] = ["GVHF_EXT_DIR", "LD_LIBRARY_PATH", "DYLD_LIBRARY_PATH"];
const SYSTEM_ROOTS: [&str; 3] = ["/usr", "/usr/local", "/opt"];
const LIB_DIRS: [&str; 4] = ["", "lib", "lib64", "lib/x86_64-linux-gnu"];

/// Directories that may hold `libopenblas`, from the environment first and system prefixes last.
fn search_dirs() -> Vec<PathBuf> {
    let sep = if cfg!(windows) { ';' } else { ':' };
    let from_env = PATH_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .flat_map(|paths| paths.split(sep).filter(|p| !p.is_empty()).map(PathBuf::from).collect::<Vec<_>>());
    let roots: Vec<PathBuf> = from_env.chain(SYSTEM_ROOTS.iter().map(PathBuf::from)).collect();

    let mut dirs: Vec<PathBuf> = vec![];
    for root in roots {
        for lib in LIB_DIRS {
            if let Ok(dir) = std::fs::canonicalize(root.join(lib)) {
                if !dirs.contains(&dir) {
                    dirs.push(dir);
                }
            }
        }
    }
    dirs
}

fn link_openblas() {
    PATH_VARS.iter().for_each(|var| println!("cargo:rerun-if-env-changed={var}"));
    for dir in search_dirs() {
        println!("cargo:rustc-link-search=native={}", dir.display());
    }
    println!("cargo:rustc-link-lib=openblas");
    println!("cargo:rustc-link-lib=gomp");
}

fn main() {
    #[cfg(feature = "use_openblas")]
    link_openblas();
}
