use clap::{Args, Parser, Subcommand};
use libcint::prelude::*;
use rstsr::prelude::*;
use showcase_workshop_rstsr_gvhf::prelude::*;
use showcase_workshop_rstsr_gvhf::*;

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct CliParser {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct EngineArgs {
    #[clap(long, default_value_t = 1e-13, help = "Absolute Schwarz cutoff for shell pairs")]
    cutoff: f64,

    #[clap(long = "group-size", default_value_t = 256, help = "Target Cartesian functions per shell group")]
    group_size: usize,

    #[clap(long, help = "Fully decontract general contractions instead of replicating primitives")]
    decontract: bool,
}

impl EngineArgs {
    fn config(&self, base: EngineConfig) -> EngineConfig {
        let mode = if self.decontract { ContractionMode::Decontract } else { ContractionMode::Replica };
        EngineConfig { cutoff: self.cutoff, group_size: self.group_size, mode, ..base }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    #[clap(name = "jk", about = "Coulomb and exchange matrices for a density")]
    Jk {
        #[clap(short, long = "mol", help = "Path to the json file containing molecular data")]
        mol_file: String,

        #[clap(long = "dm", help = "Density matrix as .npy (core-Hamiltonian guess if omitted)")]
        dm_file: Option<String>,

        #[clap(long, default_value_t = 0.0, help = "Range-separation parameter of erf(omega r)/r")]
        omega: f64,

        #[clap(flatten)]
        engine: EngineArgs,
    },

    #[clap(name = "int3c2e", about = "Three-center integrals, two-center metric and their contractions")]
    Int3c2e {
        #[clap(short, long = "mol", help = "Path to the json file containing molecular data")]
        mol_file: String,

        #[clap(short, long = "aux", help = "Path to the json file containing auxiliary basis data")]
        aux_file: String,

        #[clap(flatten)]
        engine: EngineArgs,
    },
}

fn tensor_from_file(fname: &str) -> Result<Tsr, Box<dyn std::error::Error>> {
    // c-contiguous numpy array, kept row-major
    let device = DeviceTsr::default();
    let bytes = std::fs::read(fname)?;
    let npy = npyz::NpyFile::new(&bytes[..])?;
    let shape = npy.shape().iter().map(|x| *x as usize).collect::<Vec<usize>>();
    let data: Vec<f64> = npy.into_vec()?;
    Ok(rt::asarray((data, shape.c(), &device)))
}

fn run(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Jk { mol_file, dm_file, omega, engine } => {
            let time = std::time::Instant::now();
            let cint_data = CInt::from_json(&mol_file);
            let dm = match dm_file {
                Some(fname) => tensor_from_file(&fname)?,
                None => util::core_guess(&cint_data).1,
            };
            let config = engine.config(EngineConfig { omega, ..Default::default() });
            let opt = VhfOpt::new(&cint_data, config)?;
            let jk = opt.get_jk(&dm, true, true)?;
            if let (Some(vj), Some(vk)) = (jk.vj, jk.vk) {
                println!("|J| = {:.10}", vj.l2_norm());
                println!("|K| = {:.10}", vk.l2_norm());
                println!("E_J = {:.10}", 0.5 * (&dm * &vj).sum());
                println!("E_K = {:.10}", -0.25 * (&dm * &vk).sum());
            }
            println!("Elapsed time for J/K: {:.2?}", time.elapsed());
        },
        Command::Int3c2e { mol_file, aux_file, engine } => {
            let time = std::time::Instant::now();
            let cint_data = CInt::from_json(&mol_file);
            let aux_cint_data = CInt::from_json(&aux_file);
            let opt = Int3c2eOpt::new(&cint_data, &aux_cint_data, engine.config(EngineConfig::density_fitting()), true)?;
            let int3c2e = opt.get_int3c2e()?;
            let int2c2e = opt.get_int2c2e()?;
            println!("|(P|ij)| = {:.10}", int3c2e.l2_norm());
            println!("|(P|Q)| = {:.10}", int2c2e.l2_norm());

            let (mo_occ, dm) = util::core_guess(&cint_data);
            let wjk = opt.get_int3c2e_wjk(&dm, &mo_occ)?;
            println!("|wj| = {:.10}, |wk| = {:.10} ({:?})", wjk.wj.l2_norm(), wjk.wk.l2_norm(), wjk.placement);

            // density-fitted Coulomb energy through the two-pass build
            let rhoj = opt.get_j_int3c2e_pass1(&dm)?;
            let naux = rhoj.shape()[0];
            let int2c2e_l = rt::linalg::cholesky((int2c2e.view(), Lower));
            let y = rt::linalg::solve_triangular((int2c2e_l.view(), rhoj.into_shape([naux, 1]), Lower));
            let fitted = rt::linalg::solve_triangular((int2c2e_l.t(), y, Upper));
            let vj = opt.get_j_int3c2e_pass2(&fitted.into_shape([naux]))?;
            println!("E_J(DF) = {:.10}", 0.5 * (&dm * &vj).sum());
            let rho = opt.get_int3c2e_jk(&dm, &mo_occ)?;
            println!("|rhok| = {:.10} ({:?})", rho.rhok.l2_norm(), rho.placement);

            let dh1e = get_dh1e(&cint_data, &dm, EngineConfig::density_fitting())?;
            println!("|dh1e| = {:.10}", dh1e.l2_norm());
            println!("Elapsed time for three-center integrals: {:.2?}", time.elapsed());
        },
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let args = CliParser::parse();
    if let Err(err) = run(args.command) {
        log::error!("{err}");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
