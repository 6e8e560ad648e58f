//! Labeled training-set assembly.
//!
//! Every generated example is one of a pair: a fresh noise background
//! (label 0) and the same background with a synthetic burst injected
//! (label 1).  Pairs are simulated in parallel with **rayon**, each pair on
//! its own RNG stream derived from the master seed, so the output is
//! independent of thread scheduling.  The assembled stack can be normalized
//! per sample, shuffled into train/eval partitions, and archived as `.npz`
//! (or HDF5 when compiled with the `hdf5-support` feature).

use std::fs::File;
use std::path::Path;

use log::info;
use ndarray::{s, Array1, Array3, Axis};
use ndarray_npy::{NpzReader, NpzWriter};
use pyo3::prelude::*;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::simulate::{FrbSimulator, SimulateError};
use crate::types::{LabeledDataset, ParamError, SimParams, LABEL_FRB, LABEL_NOISE};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while assembling or archiving a dataset.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("simulation failed: {0}")]
    Simulate(#[from] SimulateError),

    #[error("invalid dataset: {0}")]
    Invalid(#[from] ParamError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("npz write error: {0}")]
    NpzWrite(#[from] ndarray_npy::WriteNpzError),

    #[error("npz read error: {0}")]
    NpzRead(#[from] ndarray_npy::ReadNpzError),

    #[cfg(feature = "hdf5-support")]
    #[error("HDF5 error: {0}")]
    Hdf5(String),

    #[error("train fraction must lie in (0, 1), got {0}")]
    BadSplit(f64),

    #[error("cannot generate an empty dataset")]
    Empty,
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Mixing constant for per-pair RNG streams (golden-ratio increment).
const STREAM_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Simulate `n_pairs` background/injected pairs and stack them into a
/// labeled dataset of `2 * n_pairs` samples.
///
/// Sample `2i` is the noise-only background, sample `2i + 1` its injected
/// twin; both record the SNR sampled for the burst.  Each pair runs on an
/// independent `ChaCha8` stream seeded from `params.seed` and the pair
/// index, so results do not depend on how rayon schedules the work.
pub fn generate(params: &SimParams, n_pairs: usize) -> Result<LabeledDataset, DatasetError> {
    if n_pairs == 0 {
        return Err(DatasetError::Empty);
    }

    info!(
        "simulating {} background/burst pairs ({}×{} each)",
        n_pairs, params.nfreq, params.ntime,
    );

    let pairs: Vec<_> = (0..n_pairs)
        .into_par_iter()
        .map(|i| {
            let stream = params
                .seed
                .wrapping_add((i as u64 + 1).wrapping_mul(STREAM_MIX));
            let mut sim = FrbSimulator::with_seed(params.clone(), stream);
            let background = sim.background();
            let (injected, snr) = sim.inject(&background)?;
            Ok((background, injected, snr))
        })
        .collect::<Result<_, SimulateError>>()?;

    let n = 2 * n_pairs;
    let mut data = Array3::<f32>::zeros((n, params.nfreq, params.ntime));
    let mut labels = Array1::<u8>::zeros(n);
    let mut snrs = Array1::<f64>::zeros(n);

    for (i, (background, injected, snr)) in pairs.into_iter().enumerate() {
        data.slice_mut(s![2 * i, .., ..]).assign(&background);
        data.slice_mut(s![2 * i + 1, .., ..]).assign(&injected);
        labels[2 * i] = LABEL_NOISE;
        labels[2 * i + 1] = LABEL_FRB;
        snrs[2 * i] = snr;
        snrs[2 * i + 1] = snr;
    }

    Ok(LabeledDataset::new(data, labels, snrs)?)
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Normalize every sample in place: subtract the sample median, divide by
/// the sample standard deviation, then zero any non-finite values (a flat
/// sample divides by zero and is wiped rather than poisoning training).
pub fn normalize(dataset: &mut LabeledDataset) {
    for mut sample in dataset.data_mut().axis_iter_mut(Axis(0)) {
        let mut values: Vec<f32> = sample.iter().copied().collect();
        let med = median(&mut values);
        let std = sample.std(0.0);

        sample.mapv_inplace(|v| {
            let out = (v - med) / std;
            if out.is_finite() {
                out
            } else {
                0.0
            }
        });
    }
}

/// Median of a mutable scratch buffer; averages the two central elements for
/// even lengths, matching the numpy convention.
fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

// ---------------------------------------------------------------------------
// Shuffle / split
// ---------------------------------------------------------------------------

/// Shuffle the dataset and split it into `(train, eval)` partitions, with
/// `train_frac` of the samples in the training set.  Labels and SNR values
/// follow their samples through the permutation.
pub fn shuffle_split(
    dataset: &LabeledDataset,
    train_frac: f64,
    rng: &mut ChaCha8Rng,
) -> Result<(LabeledDataset, LabeledDataset), DatasetError> {
    if !(train_frac > 0.0 && train_frac < 1.0) {
        return Err(DatasetError::BadSplit(train_frac));
    }
    if dataset.is_empty() {
        return Err(DatasetError::Empty);
    }

    let n = dataset.len();
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);

    let n_train = ((n as f64) * train_frac) as usize;
    let (train_idx, eval_idx) = indices.split_at(n_train);

    Ok((
        take_samples(dataset, train_idx)?,
        take_samples(dataset, eval_idx)?,
    ))
}

fn take_samples(dataset: &LabeledDataset, indices: &[usize]) -> Result<LabeledDataset, DatasetError> {
    let mut data = Array3::<f32>::zeros((indices.len(), dataset.nfreq(), dataset.ntime()));
    let mut labels = Array1::<u8>::zeros(indices.len());
    let mut snrs = Array1::<f64>::zeros(indices.len());

    for (dst, &src) in indices.iter().enumerate() {
        data.slice_mut(s![dst, .., ..])
            .assign(&dataset.data().slice(s![src, .., ..]));
        labels[dst] = dataset.labels()[src];
        snrs[dst] = dataset.snrs()[src];
    }

    Ok(LabeledDataset::new(data, labels, snrs)?)
}

// ---------------------------------------------------------------------------
// Archiving
// ---------------------------------------------------------------------------

/// Write the dataset to an `.npz` archive with arrays `data`, `labels`, and
/// `snrs`.
pub fn write_npz(path: &Path, dataset: &LabeledDataset) -> Result<(), DatasetError> {
    info!("writing {} samples to {}", dataset.len(), path.display());
    let mut npz = NpzWriter::new(File::create(path)?);
    npz.add_array("data", dataset.data())?;
    npz.add_array("labels", dataset.labels())?;
    npz.add_array("snrs", dataset.snrs())?;
    npz.finish()?;
    Ok(())
}

/// Read a dataset previously written by [`write_npz`].
pub fn read_npz(path: &Path) -> Result<LabeledDataset, DatasetError> {
    let mut npz = NpzReader::new(File::open(path)?)?;
    let data: Array3<f32> = npz.by_name("data")?;
    let labels: Array1<u8> = npz.by_name("labels")?;
    let snrs: Array1<f64> = npz.by_name("snrs")?;
    Ok(LabeledDataset::new(data, labels, snrs)?)
}

/// Write the dataset to an HDF5 file with datasets `data`, `labels`, and
/// `snrs`.
#[cfg(feature = "hdf5-support")]
pub fn write_hdf5(path: &Path, dataset: &LabeledDataset) -> Result<(), DatasetError> {
    let file = hdf5::File::create(path).map_err(|e| DatasetError::Hdf5(e.to_string()))?;
    file.new_dataset_builder()
        .with_data(dataset.data())
        .create("data")
        .map_err(|e| DatasetError::Hdf5(e.to_string()))?;
    file.new_dataset_builder()
        .with_data(dataset.labels())
        .create("labels")
        .map_err(|e| DatasetError::Hdf5(e.to_string()))?;
    file.new_dataset_builder()
        .with_data(dataset.snrs())
        .create("snrs")
        .map_err(|e| DatasetError::Hdf5(e.to_string()))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// DatasetBuilder (Python-exposed)
// ---------------------------------------------------------------------------

/// High-level dataset generator exposed to Python.
///
/// Wraps [`generate`], [`normalize`], and [`write_npz`] so a training script
/// can produce a finished archive in one call, or pull the arrays across the
/// boundary as flat vectors.
#[pyclass]
#[derive(Clone, Debug)]
pub struct DatasetBuilder {
    params: SimParams,
}

#[pymethods]
impl DatasetBuilder {
    #[new]
    #[pyo3(signature = (params=None))]
    pub fn new(params: Option<SimParams>) -> Self {
        Self {
            params: params.unwrap_or_default(),
        }
    }

    /// Simulate `n_pairs` pairs and return
    /// `(data, labels, snrs, n, nfreq, ntime)` with `data` flat row-major.
    #[pyo3(name = "generate", signature = (n_pairs, normalize_samples=true))]
    pub fn py_generate(
        &self,
        n_pairs: usize,
        normalize_samples: bool,
    ) -> PyResult<(Vec<f32>, Vec<u8>, Vec<f64>, usize, usize, usize)> {
        let mut dataset = generate(&self.params, n_pairs)
            .map_err(|e| pyo3::exceptions::PyRuntimeError::new_err(e.to_string()))?;
        if normalize_samples {
            normalize(&mut dataset);
        }
        let n = dataset.len();
        let nfreq = dataset.nfreq();
        let ntime = dataset.ntime();
        let (data, labels, snrs) = dataset.into_parts();
        Ok((
            data.into_raw_vec(),
            labels.into_raw_vec(),
            snrs.into_raw_vec(),
            n,
            nfreq,
            ntime,
        ))
    }

    /// Simulate, optionally normalize, and archive a dataset to `path`.
    /// Returns the number of samples written.
    #[pyo3(name = "generate_npz", signature = (path, n_pairs, normalize_samples=true))]
    pub fn py_generate_npz(
        &self,
        path: &str,
        n_pairs: usize,
        normalize_samples: bool,
    ) -> PyResult<usize> {
        let mut dataset = generate(&self.params, n_pairs)
            .map_err(|e| pyo3::exceptions::PyRuntimeError::new_err(e.to_string()))?;
        if normalize_samples {
            normalize(&mut dataset);
        }
        write_npz(Path::new(path), &dataset)
            .map_err(|e| pyo3::exceptions::PyIOError::new_err(e.to_string()))?;
        Ok(dataset.len())
    }

    fn __repr__(&self) -> String {
        format!("DatasetBuilder({:?})", self.params)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;

    fn small_params(seed: u64) -> SimParams {
        SimParams::new(16, 64, 1350.0, 1500.0, 4, 0.1, 8.0, 1.0, seed).unwrap()
    }

    #[test]
    fn generate_interleaves_noise_and_bursts() {
        let ds = generate(&small_params(7), 5).unwrap();
        assert_eq!(ds.len(), 10);
        assert_eq!(ds.nfreq(), 16);
        assert_eq!(ds.ntime(), 64);

        for i in 0..5 {
            assert_eq!(ds.labels()[2 * i], LABEL_NOISE);
            assert_eq!(ds.labels()[2 * i + 1], LABEL_FRB);
            // The pair shares one SNR draw.
            assert_eq!(ds.snrs()[2 * i], ds.snrs()[2 * i + 1]);
            assert!(ds.snrs()[2 * i] >= 8.0);
        }
    }

    #[test]
    fn generate_is_reproducible() {
        let a = generate(&small_params(11), 3).unwrap();
        let b = generate(&small_params(11), 3).unwrap();
        assert_eq!(a.data(), b.data());
        assert_eq!(a.snrs(), b.snrs());
    }

    #[test]
    fn generate_rejects_zero_pairs() {
        assert!(matches!(
            generate(&small_params(0), 0),
            Err(DatasetError::Empty)
        ));
    }

    #[test]
    fn normalize_centres_and_scales_each_sample() {
        let mut ds = generate(&small_params(13), 2).unwrap();
        normalize(&mut ds);

        for sample in ds.data().axis_iter(Axis(0)) {
            let mut values: Vec<f32> = sample.iter().copied().collect();
            let med = median(&mut values);
            let std = sample.std(0.0);
            assert_abs_diff_eq!(med, 0.0, epsilon = 1e-3);
            assert_abs_diff_eq!(std, 1.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn normalize_wipes_flat_samples() {
        let data = Array3::<f32>::ones((1, 4, 4));
        let labels = Array1::from(vec![LABEL_NOISE]);
        let snrs = Array1::from(vec![9.0f64]);
        let mut ds = LabeledDataset::new(data, labels, snrs).unwrap();

        normalize(&mut ds);
        assert!(ds.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn median_averages_central_pair() {
        assert_abs_diff_eq!(median(&mut [3.0, 1.0]), 2.0);
        assert_abs_diff_eq!(median(&mut [5.0, 1.0, 3.0]), 3.0);
        assert_abs_diff_eq!(median(&mut []), 0.0);
    }

    #[test]
    fn shuffle_split_partitions_all_samples() {
        let ds = generate(&small_params(17), 8).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (train, eval) = shuffle_split(&ds, 0.5, &mut rng).unwrap();

        assert_eq!(train.len() + eval.len(), ds.len());
        assert_eq!(train.len(), 8);

        // Every SNR value from the input shows up exactly once.
        let mut seen: Vec<f64> = train
            .snrs()
            .iter()
            .chain(eval.snrs().iter())
            .copied()
            .collect();
        let mut expected: Vec<f64> = ds.snrs().iter().copied().collect();
        seen.sort_by(|a, b| a.partial_cmp(b).unwrap());
        expected.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(seen, expected);
    }

    #[test]
    fn shuffle_split_rejects_bad_fraction() {
        let ds = generate(&small_params(19), 2).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        assert!(shuffle_split(&ds, 0.0, &mut rng).is_err());
        assert!(shuffle_split(&ds, 1.0, &mut rng).is_err());
    }

    #[test]
    fn npz_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("training.npz");

        let ds = generate(&small_params(23), 2).unwrap();
        write_npz(&path, &ds).unwrap();
        let back = read_npz(&path).unwrap();

        assert_eq!(back.len(), ds.len());
        assert_eq!(back.data(), ds.data());
        assert_eq!(back.labels(), ds.labels());
        assert_eq!(back.snrs(), ds.snrs());
    }
}
