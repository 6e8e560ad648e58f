//! Extraction of fixed-size training samples from real observations.
//!
//! Classifier backgrounds come from real telescope recordings: each `.fil`
//! file in a directory is read in full, averaged down to the training
//! channel count, and sliced into `(nsub, nbins)` blocks.  Files are drawn
//! at random until enough blocks have accumulated, then an exact-size subset
//! is kept and archived.  Termination is explicit throughout — a file
//! contributes however many whole blocks it contains and the trailing
//! partial block is dropped.

use std::fs::File;
use std::path::{Path, PathBuf};

use log::{info, warn};
use ndarray::{s, Array1, Array2, Array3, Axis};
use ndarray_npy::NpzWriter;
use pyo3::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::filterbank::{fscrunch, subband_frequencies, FilterbankError, FilterbankReader};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while sampling spectra from observation files.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("filterbank error: {0}")]
    Filterbank(#[from] FilterbankError),

    #[error("npz write error: {0}")]
    NpzWrite(#[from] ndarray_npy::WriteNpzError),

    #[error("no .fil files found under {0}")]
    NoFiles(PathBuf),

    #[error("gave up after {draws} file draws yielding no usable blocks")]
    Exhausted { draws: usize },

    #[error("requested 0 samples")]
    Empty,

    #[error("inconsistent block shapes: {0}")]
    Shape(String),
}

/// Consecutive fruitless file draws tolerated before giving up.  A draw is
/// fruitless when the chosen file yields zero whole blocks.
const MAX_FRUITLESS_DRAWS: usize = 64;

// ---------------------------------------------------------------------------
// Chunking
// ---------------------------------------------------------------------------

/// Split a `(nchans, n_times)` spectrogram into consecutive
/// `(nchans, nbins)` blocks, dropping a trailing partial block.
pub fn chop(spectrum: &Array2<f32>, nbins: usize) -> Vec<Array2<f32>> {
    let n_times = spectrum.dim().1;
    let n_blocks = if nbins == 0 { 0 } else { n_times / nbins };

    (0..n_blocks)
        .map(|b| {
            spectrum
                .slice(s![.., b * nbins..(b + 1) * nbins])
                .to_owned()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Directory scanning
// ---------------------------------------------------------------------------

/// All `.fil` files directly under `dir`, sorted by name for determinism.
pub fn list_fil_files(dir: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("fil"))
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(ExtractError::NoFiles(dir.to_path_buf()));
    }
    Ok(files)
}

// ---------------------------------------------------------------------------
// SpectraExtractor
// ---------------------------------------------------------------------------

/// Samples fixed-size background spectra from a directory of `.fil` files.
///
/// Configure the subband count, block length, and seed, then call
/// [`SpectraExtractor::sample`] for the blocks or
/// [`SpectraExtractor::run`] to write an archive in one step.
#[pyclass]
#[derive(Clone, Debug)]
pub struct SpectraExtractor {
    /// Number of frequency subbands each block is averaged down to.
    #[pyo3(get)]
    pub nsub: usize,

    /// Number of time bins per block.
    #[pyo3(get)]
    pub nbins: usize,

    /// RNG seed for file draws and subset selection.
    #[pyo3(get)]
    pub seed: u64,
}

#[pymethods]
impl SpectraExtractor {
    #[new]
    #[pyo3(signature = (nsub=64, nbins=256, seed=0))]
    pub fn new(nsub: usize, nbins: usize, seed: u64) -> Self {
        Self { nsub, nbins, seed }
    }

    /// Sample blocks from `path` and write them to `save_name`.
    /// Returns the number of blocks archived.
    #[pyo3(name = "run")]
    pub fn py_run(&self, path: &str, num_samples: usize, save_name: &str) -> PyResult<usize> {
        self.run(Path::new(path), num_samples, Path::new(save_name))
            .map_err(|e| pyo3::exceptions::PyRuntimeError::new_err(e.to_string()))
    }

    fn __repr__(&self) -> String {
        format!(
            "SpectraExtractor(nsub={}, nbins={}, seed={})",
            self.nsub, self.nbins, self.seed,
        )
    }
}

impl SpectraExtractor {
    /// Draw random files from `dir` until `num_samples` whole blocks have
    /// accumulated, then keep a uniformly chosen subset of exactly that
    /// size.  Returns the blocks and the subband centre frequencies (MHz)
    /// of the last file read.
    pub fn sample(
        &self,
        dir: &Path,
        num_samples: usize,
    ) -> Result<(Vec<Array2<f32>>, Array1<f64>), ExtractError> {
        if num_samples == 0 {
            return Err(ExtractError::Empty);
        }

        let files = list_fil_files(dir)?;
        info!(
            "sampling {} blocks of {}×{} from {} files under {}",
            num_samples,
            self.nsub,
            self.nbins,
            files.len(),
            dir.display(),
        );

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let reader = FilterbankReader::new();

        let mut blocks: Vec<Array2<f32>> = Vec::new();
        let mut freqs: Option<Array1<f64>> = None;
        let mut fruitless = 0usize;

        while blocks.len() < num_samples {
            // files is non-empty, so choose cannot fail
            let chosen = files
                .choose(&mut rng)
                .ok_or_else(|| ExtractError::NoFiles(dir.to_path_buf()))?;

            let path_str = chosen.to_string_lossy();
            let (header, data) = reader.read(&path_str)?;
            let scrunched = fscrunch(&data, self.nsub)?;

            // Reader output is (time, channel); blocks are (channel, time).
            let spectrum = scrunched.t().to_owned();
            let new_blocks = chop(&spectrum, self.nbins);

            if new_blocks.is_empty() {
                fruitless += 1;
                warn!(
                    "{} yielded no whole {}-bin blocks ({} fruitless draws)",
                    chosen.display(),
                    self.nbins,
                    fruitless,
                );
                if fruitless >= MAX_FRUITLESS_DRAWS {
                    return Err(ExtractError::Exhausted { draws: fruitless });
                }
                continue;
            }
            fruitless = 0;

            freqs = Some(Array1::from(subband_frequencies(&header, self.nsub)?));
            blocks.extend(new_blocks);
            info!(
                "scanned {}: {} blocks total",
                chosen.display(),
                blocks.len(),
            );
        }

        // The last file usually overshoots; keep a uniform subset of
        // exactly num_samples blocks, without replacement.
        let dropped = blocks.len() - num_samples;
        if dropped > 0 {
            info!("dropping {} surplus blocks", dropped);
            let mut keep = rand::seq::index::sample(&mut rng, blocks.len(), num_samples).into_vec();
            keep.sort_unstable();
            blocks = keep.into_iter().map(|i| blocks[i].clone()).collect();
        }

        let freqs = freqs.ok_or(ExtractError::Exhausted { draws: 0 })?;
        Ok((blocks, freqs))
    }

    /// Sample blocks and archive them with [`write_archive`].
    /// Returns the number of blocks written.
    pub fn run(
        &self,
        dir: &Path,
        num_samples: usize,
        out_path: &Path,
    ) -> Result<usize, ExtractError> {
        let (blocks, freqs) = self.sample(dir, num_samples)?;
        write_archive(out_path, &blocks, &freqs)?;
        Ok(blocks.len())
    }
}

// ---------------------------------------------------------------------------
// Archiving
// ---------------------------------------------------------------------------

/// Write sampled blocks to an `.npz` archive with arrays `spectra_data`
/// (`(n, nsub, nbins)`) and `freq` (subband centre frequencies in MHz).
pub fn write_archive(
    path: &Path,
    blocks: &[Array2<f32>],
    freqs: &Array1<f64>,
) -> Result<(), ExtractError> {
    if blocks.is_empty() {
        return Err(ExtractError::Empty);
    }
    let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
    let stacked: Array3<f32> = ndarray::stack(Axis(0), &views)
        .map_err(|e| ExtractError::Shape(e.to_string()))?;

    info!(
        "writing {} spectra blocks to {}",
        blocks.len(),
        path.display(),
    );
    let mut npz = NpzWriter::new(File::create(path)?);
    npz.add_array("spectra_data", &stacked)?;
    npz.add_array("freq", freqs)?;
    npz.finish()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use std::io::Write;

    fn put_string(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
        buf.extend_from_slice(s.as_bytes());
    }

    fn put_int(buf: &mut Vec<u8>, keyword: &str, v: i32) {
        put_string(buf, keyword);
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_double(buf: &mut Vec<u8>, keyword: &str, v: f64) {
        put_string(buf, keyword);
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_test_fil(path: &Path, nchans: usize, n_times: usize) {
        let mut buf = Vec::new();
        put_string(&mut buf, "HEADER_START");
        put_int(&mut buf, "nchans", nchans as i32);
        put_int(&mut buf, "nbits", 32);
        put_double(&mut buf, "tsamp", 1e-3);
        put_double(&mut buf, "fch1", 1500.0);
        put_double(&mut buf, "foff", -1.0);
        put_double(&mut buf, "tstart", 58000.0);
        put_string(&mut buf, "HEADER_END");
        for i in 0..(nchans * n_times) {
            buf.extend_from_slice(&(i as f32).to_le_bytes());
        }
        File::create(path).unwrap().write_all(&buf).unwrap();
    }

    #[test]
    fn chop_drops_partial_trailing_block() {
        let spectrum = Array2::<f32>::zeros((4, 70));
        let blocks = chop(&spectrum, 32);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].dim(), (4, 32));

        assert!(chop(&spectrum, 0).is_empty());
        assert!(chop(&Array2::<f32>::zeros((4, 10)), 32).is_empty());
    }

    #[test]
    fn list_fil_files_filters_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        write_test_fil(&dir.path().join("b.fil"), 4, 8);
        write_test_fil(&dir.path().join("a.fil"), 4, 8);
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let files = list_fil_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.fil"));

        let empty = tempfile::tempdir().unwrap();
        assert!(matches!(
            list_fil_files(empty.path()),
            Err(ExtractError::NoFiles(_))
        ));
    }

    #[test]
    fn sample_returns_exact_count() {
        let dir = tempfile::tempdir().unwrap();
        // 4 channels × 40 time bins → 5 whole 8-bin blocks per file.
        write_test_fil(&dir.path().join("one.fil"), 4, 40);
        write_test_fil(&dir.path().join("two.fil"), 4, 40);

        let extractor = SpectraExtractor::new(2, 8, 99);
        let (blocks, freqs) = extractor.sample(dir.path(), 7).unwrap();

        assert_eq!(blocks.len(), 7);
        assert!(blocks.iter().all(|b| b.dim() == (2, 8)));
        assert_eq!(freqs.len(), 2);
    }

    #[test]
    fn sample_gives_up_on_short_files() {
        let dir = tempfile::tempdir().unwrap();
        // 4 time bins can never fill a 256-bin block.
        write_test_fil(&dir.path().join("short.fil"), 4, 4);

        let extractor = SpectraExtractor::new(2, 256, 1);
        assert!(matches!(
            extractor.sample(dir.path(), 3),
            Err(ExtractError::Exhausted { .. })
        ));
    }

    #[test]
    fn run_writes_archive() {
        let dir = tempfile::tempdir().unwrap();
        write_test_fil(&dir.path().join("one.fil"), 4, 64);
        let out = dir.path().join("backgrounds.npz");

        let extractor = SpectraExtractor::new(4, 16, 7);
        let written = extractor.run(dir.path(), 3, &out).unwrap();
        assert_eq!(written, 3);
        assert!(out.exists());
    }

    #[test]
    fn archive_rejects_empty_block_list() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("empty.npz");
        let freqs = Array1::<f64>::zeros(4);
        assert!(matches!(
            write_archive(&out, &[], &freqs),
            Err(ExtractError::Empty)
        ));
    }
}
