//! Common types shared across the FRB simulation pipeline.
//!
//! These structures represent the fundamental data objects of the pipeline:
//! simulation configuration, observation metadata (filterbank headers), and
//! the labeled training sets handed to a downstream classifier.

use ndarray::{Array1, Array3};
use pyo3::prelude::*;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised when constructing invalid configuration or dataset objects.
#[derive(Debug, thiserror::Error)]
pub enum ParamError {
    #[error("dynamic-spectrum shape must be non-zero on both axes (got {0}×{1})")]
    EmptyShape(usize, usize),

    #[error("max_width must be at least 2 bins and below half the time axis (got {got}, ntime={ntime})")]
    BadPulseWidth { got: usize, ntime: usize },

    #[error("scattering timescale tau must be positive and finite (got {0})")]
    BadTau(f64),

    #[error("bandwidth must be positive and finite (got {0})")]
    BadBandwidth(f64),

    #[error("SNR sampling parameters invalid: {0}")]
    BadSnr(String),

    #[error("dataset arrays disagree: {0} samples, {1} labels, {2} SNR values")]
    LengthMismatch(usize, usize, usize),
}

// ---------------------------------------------------------------------------
// SimParams
// ---------------------------------------------------------------------------

/// Configuration for the FRB simulation engine.
///
/// A simulated observation is a dynamic spectrum of `nfreq` frequency
/// channels by `ntime` time bins.  The frequency axis spans `bandwidth` MHz
/// centred on the reference frequency `f_ref`, and the injected burst is
/// controlled by the maximum intrinsic pulse width, the scattering timescale
/// `tau`, and the peak-SNR sampling distribution.
#[pyclass(get_all, set_all)]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimParams {
    /// Number of frequency channels (rows of the dynamic spectrum).
    pub nfreq: usize,

    /// Number of time bins (columns of the dynamic spectrum).
    pub ntime: usize,

    /// Reference frequency of the observation, in MHz.
    pub f_ref: f64,

    /// Total observing bandwidth, in MHz.  The channel axis runs from
    /// `f_ref - bandwidth/2` to `f_ref + bandwidth/2`.
    pub bandwidth: f64,

    /// Upper bound (exclusive) on the intrinsic Gaussian pulse width, in
    /// time bins.  Widths are drawn uniformly from `[1, max_width)`.
    pub max_width: usize,

    /// Scattering timescale at the reference frequency, in ms.  Pulse
    /// broadening scales as `tau * (f / f_ref)^-4` across the band.
    pub tau: f64,

    /// Minimum peak signal-to-noise ratio of an injected burst.
    pub snr_min: f64,

    /// Log-normal sigma for peak-SNR sampling.  The sampled SNR is
    /// `snr_min + LogNormal(mu=1, sigma=snr_sigma)`.
    pub snr_sigma: f64,

    /// Master RNG seed.  Every simulation stream is derived from this value,
    /// so a fixed seed reproduces a dataset exactly.
    pub seed: u64,
}

#[pymethods]
impl SimParams {
    #[new]
    #[pyo3(signature = (nfreq=64, ntime=256, f_ref=1350.0, bandwidth=1500.0, max_width=4, tau=0.1, snr_min=8.0, snr_sigma=1.0, seed=0))]
    #[allow(clippy::too_many_arguments)]
    pub fn py_new(
        nfreq: usize,
        ntime: usize,
        f_ref: f64,
        bandwidth: f64,
        max_width: usize,
        tau: f64,
        snr_min: f64,
        snr_sigma: f64,
        seed: u64,
    ) -> PyResult<Self> {
        Self::new(
            nfreq, ntime, f_ref, bandwidth, max_width, tau, snr_min, snr_sigma, seed,
        )
        .map_err(|e| pyo3::exceptions::PyValueError::new_err(e.to_string()))
    }

    fn __repr__(&self) -> String {
        format!(
            "SimParams(shape=({}, {}), f_ref={:.1} MHz, bw={:.1} MHz, max_width={}, tau={:.3} ms, snr_min={:.1}, seed={})",
            self.nfreq,
            self.ntime,
            self.f_ref,
            self.bandwidth,
            self.max_width,
            self.tau,
            self.snr_min,
            self.seed,
        )
    }
}

impl SimParams {
    /// Validated constructor (Rust-native interface).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        nfreq: usize,
        ntime: usize,
        f_ref: f64,
        bandwidth: f64,
        max_width: usize,
        tau: f64,
        snr_min: f64,
        snr_sigma: f64,
        seed: u64,
    ) -> Result<Self, ParamError> {
        if nfreq == 0 || ntime == 0 {
            return Err(ParamError::EmptyShape(nfreq, ntime));
        }
        // A width is drawn from [1, max_width), and the burst must be able to
        // move on the time axis without touching the array edges.
        if max_width < 2 || max_width >= ntime / 2 {
            return Err(ParamError::BadPulseWidth {
                got: max_width,
                ntime,
            });
        }
        if !tau.is_finite() || tau <= 0.0 {
            return Err(ParamError::BadTau(tau));
        }
        if !bandwidth.is_finite() || bandwidth <= 0.0 {
            return Err(ParamError::BadBandwidth(bandwidth));
        }
        if !snr_min.is_finite() || snr_min < 0.0 {
            return Err(ParamError::BadSnr(format!("snr_min = {}", snr_min)));
        }
        if !snr_sigma.is_finite() || snr_sigma <= 0.0 {
            return Err(ParamError::BadSnr(format!("snr_sigma = {}", snr_sigma)));
        }

        Ok(Self {
            nfreq,
            ntime,
            f_ref,
            bandwidth,
            max_width,
            tau,
            snr_min,
            snr_sigma,
            seed,
        })
    }

    /// Channel centre frequencies in MHz, low to high, inclusive endpoints.
    pub fn frequencies(&self) -> Array1<f64> {
        Array1::linspace(
            self.f_ref - self.bandwidth / 2.0,
            self.f_ref + self.bandwidth / 2.0,
            self.nfreq,
        )
    }
}

impl Default for SimParams {
    fn default() -> Self {
        // 64-channel, 256-bin L-band observation.
        Self {
            nfreq: 64,
            ntime: 256,
            f_ref: 1350.0,
            bandwidth: 1500.0,
            max_width: 4,
            tau: 0.1,
            snr_min: 8.0,
            snr_sigma: 1.0,
            seed: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// FilterbankHeader
// ---------------------------------------------------------------------------

/// Metadata header for a filterbank observation file.
///
/// Filterbank files (`.fil`) and their HDF5 equivalents (`.h5`) store
/// channelised radio-telescope data as a 2-D spectrogram
/// (time × frequency).  The header describes the shape and physical
/// coordinates of that spectrogram so downstream code can convert array
/// indices into real-world frequencies and timestamps.
#[pyclass(get_all, set_all)]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilterbankHeader {
    /// Number of frequency channels.
    pub nchans: usize,

    /// Number of intermediate frequency (IF) streams (polarisations).
    pub nifs: usize,

    /// Bits per sample in the raw data (commonly 8, 16, or 32).
    pub nbits: u32,

    /// Time between successive spectra, in seconds.
    pub tsamp: f64,

    /// Centre frequency of the *first* channel, in MHz.  Together with
    /// `foff` this defines the full frequency axis.
    pub fch1: f64,

    /// Channel bandwidth in MHz (negative when channels are ordered from
    /// high to low frequency, which is the common sigproc convention).
    pub foff: f64,

    /// Start time of the observation as MJD (Modified Julian Date).
    pub tstart: f64,

    /// Name of the observed source.
    pub source_name: String,

    /// Right Ascension of the pointing, in degrees.
    pub ra: f64,

    /// Declination of the pointing, in degrees.
    pub dec: f64,
}

#[pymethods]
impl FilterbankHeader {
    #[new]
    #[pyo3(signature = (nchans, nifs, nbits, tsamp, fch1, foff, tstart, source_name, ra, dec))]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        nchans: usize,
        nifs: usize,
        nbits: u32,
        tsamp: f64,
        fch1: f64,
        foff: f64,
        tstart: f64,
        source_name: String,
        ra: f64,
        dec: f64,
    ) -> Self {
        Self {
            nchans,
            nifs,
            nbits,
            tsamp,
            fch1,
            foff,
            tstart,
            source_name,
            ra,
            dec,
        }
    }

    /// Return the frequency of channel `i` in MHz.
    pub fn channel_freq(&self, i: usize) -> f64 {
        self.fch1 + i as f64 * self.foff
    }

    /// Return the total observation bandwidth in MHz.
    pub fn total_bandwidth(&self) -> f64 {
        (self.nchans as f64 * self.foff).abs()
    }

    fn __repr__(&self) -> String {
        format!(
            "FilterbankHeader(source='{}', nchans={}, fch1={:.4} MHz, foff={:.6} MHz, tsamp={:.6} s)",
            self.source_name, self.nchans, self.fch1, self.foff, self.tsamp,
        )
    }
}

impl FilterbankHeader {
    /// All channel centre frequencies in MHz, in storage order.
    pub fn frequencies(&self) -> Array1<f64> {
        Array1::from_iter((0..self.nchans).map(|i| self.channel_freq(i)))
    }
}

// ---------------------------------------------------------------------------
// LabeledDataset
// ---------------------------------------------------------------------------

/// Label value for a noise-only (background) sample.
pub const LABEL_NOISE: u8 = 0;

/// Label value for a sample with an injected FRB.
pub const LABEL_FRB: u8 = 1;

/// A stack of labeled dynamic spectra ready for classifier training.
///
/// Samples are stored as a `(n, nfreq, ntime)` array of `f32` power values.
/// Each sample carries a binary label ([`LABEL_NOISE`] or [`LABEL_FRB`]) and
/// the peak SNR sampled for its burst; a noise-only sample records the SNR
/// of its injected twin so recall can later be studied as a function of
/// burst brightness.
#[derive(Clone, Debug)]
pub struct LabeledDataset {
    data: Array3<f32>,
    labels: Array1<u8>,
    snrs: Array1<f64>,
}

impl LabeledDataset {
    /// Build a dataset, checking that samples, labels, and SNR values agree
    /// in length.
    pub fn new(
        data: Array3<f32>,
        labels: Array1<u8>,
        snrs: Array1<f64>,
    ) -> Result<Self, ParamError> {
        let n = data.shape()[0];
        if labels.len() != n || snrs.len() != n {
            return Err(ParamError::LengthMismatch(n, labels.len(), snrs.len()));
        }
        Ok(Self { data, labels, snrs })
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of frequency channels per sample.
    pub fn nfreq(&self) -> usize {
        self.data.shape()[1]
    }

    /// Number of time bins per sample.
    pub fn ntime(&self) -> usize {
        self.data.shape()[2]
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array3<f32> {
        &mut self.data
    }

    pub fn labels(&self) -> &Array1<u8> {
        &self.labels
    }

    pub fn snrs(&self) -> &Array1<f64> {
        &self.snrs
    }

    /// Decompose into the underlying arrays.
    pub fn into_parts(self) -> (Array3<f32>, Array1<u8>, Array1<f64>) {
        (self.data, self.labels, self.snrs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
