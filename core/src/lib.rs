//! # frbsim-core
//!
//! Fast-radio-burst simulation and training-set generation library written
//! in Rust with Python bindings via [PyO3](https://pyo3.rs).
//!
//! ## Overview
//!
//! This crate provides the computational core of the **frbsim** pipeline:
//!
//! | Module        | Purpose                                                   |
//! |---------------|-----------------------------------------------------------|
//! | [`simulate`]  | Synthesizes FRB events — scattering, scintillation, noise |
//! | [`dataset`]   | Assembles, normalizes, and archives labeled training sets |
//! | [`filterbank`]| Reads `.fil` (sigproc) and `.h5` (HDF5) spectrogram files |
//! | [`extract`]   | Chunks real observations into fixed-size backgrounds      |
//! | [`metrics`]   | Confusion-matrix evaluation of a trained classifier       |
//! | [`types`]     | Shared data structures (params, headers, datasets)        |
//!
//! ## Python usage
//!
//! When compiled as a `cdylib` (the default crate-type), the library
//! exposes a Python module called `frbsim_core`:
//!
//! ```python
//! import frbsim_core
//!
//! params = frbsim_core.SimParams(nfreq=64, ntime=256, snr_min=10.0, seed=7)
//! builder = frbsim_core.DatasetBuilder(params)
//! n = builder.generate_npz("training.npz", n_pairs=1000)
//!
//! extractor = frbsim_core.SpectraExtractor(nsub=64, nbins=256, seed=7)
//! extractor.run("/data/rfi_scans", 320, "psr_arrays.npz")
//!
//! cm = frbsim_core.ConfusionMatrix(y_true, y_pred)
//! print(cm, cm.fscore())
//! ```

pub mod dataset;
pub mod extract;
pub mod filterbank;
pub mod metrics;
pub mod simulate;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use dataset::DatasetBuilder;
pub use extract::SpectraExtractor;
pub use filterbank::FilterbankReader;
pub use metrics::ConfusionMatrix;
pub use simulate::FrbSimulator;
pub use types::{FilterbankHeader, LabeledDataset, SimParams};

use pyo3::prelude::*;

/// The top-level Python module exposed by this crate.
///
/// Registered classes:
/// - `SimParams` — simulation configuration
/// - `FrbSimulator` — single-burst synthesis engine
/// - `DatasetBuilder` — labeled training-set generator
/// - `SpectraExtractor` — real-background sampler for `.fil` directories
/// - `FilterbankReader` — auto-detecting file reader
/// - `FilterbankHeader` — observation metadata
/// - `ConfusionMatrix` — binary-classifier evaluation
/// - `SnrPartition` — per-outcome SNR values
#[pymodule]
fn frbsim_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<SimParams>()?;
    m.add_class::<FrbSimulator>()?;
    m.add_class::<DatasetBuilder>()?;
    m.add_class::<SpectraExtractor>()?;
    m.add_class::<FilterbankReader>()?;
    m.add_class::<FilterbankHeader>()?;
    m.add_class::<ConfusionMatrix>()?;
    m.add_class::<metrics::SnrPartition>()?;

    // Module-level metadata
    m.add("__version__", "0.1.0")?;
    m.add("__doc__", "Fast-radio-burst simulation and training-set core.")?;

    Ok(())
}
