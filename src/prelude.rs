#![allow(unused)]

/* #region for API callers */

pub use crate::accel::{Accelerator, BinRange, BlockViewMut, DenseView, DenseViewMut, FillLaunch, JkLaunch, KernelClass};
pub use crate::cache::{BasisProdCache, BasisProdDesc, GroupPairKind};
pub use crate::canonical::{CanonicalBasis, ContractionMode, TemplateCache};
pub use crate::config::EngineConfig;
pub use crate::dispatch::JkStats;
pub use crate::error::{GvhfError, GvhfResult};
pub use crate::fallback::{FallbackEvaluator, HostFallback};
pub use crate::host::HostAccelerator;
pub use crate::int3c2e::{get_dh1e, Int3c2eOpt, IpJkResults, RhoJkResults, WjkResults};
pub use crate::memory::{BufferPlacement, StagedBuffer};
pub use crate::screening::{GroupPairBins, PairingPolicy, SchwarzTable};
pub use crate::shell::Shell;
pub use crate::sort::{ShellGroups, SortedBasis};
pub use crate::vhfopt::{JkResults, VhfOpt};

/* #endregion */

/* #region for developers */

// RSTSR backend specification
#[cfg(not(feature = "use_openblas"))]
pub type DeviceTsr = DeviceFaer;
#[cfg(feature = "use_openblas")]
pub type DeviceTsr = DeviceOpenBLAS;

pub(crate) use libcint::prelude::*;
pub(crate) use rayon::prelude::*;
pub(crate) use rstsr::prelude::*;

pub(crate) use crate::*;

pub type Tsr<D = IxD> = Tensor<f64, DeviceTsr, D>;
pub type TsrView<'a, D = IxD> = TensorView<'a, f64, DeviceTsr, D>;
pub type TsrMut<'a, D = IxD> = TensorMut<'a, f64, DeviceTsr, D>;

/* #endregion */
