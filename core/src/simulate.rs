//! Fast-radio-burst synthesis — the heart of the training-set pipeline.
//!
//! # Background
//!
//! A fast radio burst arrives at the telescope as a short broadband pulse.
//! Three propagation effects shape what the receiver actually records in a
//! frequency–time dynamic spectrum:
//!
//! - **Intrinsic width** — the emitted pulse is modelled as a Gaussian in
//!   time, a few bins wide.
//! - **Scattering** — multipath propagation through the interstellar medium
//!   convolves the pulse with a one-sided exponential whose timescale grows
//!   steeply toward lower frequencies (`tau ∝ f^-4`), so low channels show a
//!   long "scattering tail".
//! - **Scintillation** — interference between ray paths imprints a slow
//!   quasi-periodic brightness modulation across the band, approximated here
//!   by a cosine envelope with random phase and decorrelation scale.
//!
//! # Synthesis steps
//!
//! 1. **Gaussian profile** — one normalized Gaussian row, tiled across all
//!    frequency channels.
//! 2. **Scattering profile** — per-channel exponential kernel with
//!    `tau_nu = tau * (f / f_ref)^-4`, peak-normalized.
//! 3. **Pulse profile** — FFT convolution of the two, truncated to the time
//!    axis and normalized so every channel integrates to unit area (higher
//!    frequencies keep narrower, taller pulses).
//! 4. **Scintillation** — multiply each channel by the cosine envelope.
//! 5. **Placement** — circularly shift the burst to a random spot on the
//!    time axis, keeping it clear of the array edges.
//! 6. **Injection** — scale by a peak SNR drawn from
//!    `snr_min + LogNormal(1, sigma)` and add the burst to a noise
//!    background over a random contiguous band of channels.
//!
//! All randomness flows through a [`ChaCha8Rng`] seeded from
//! [`SimParams::seed`], so a fixed seed reproduces every burst exactly.

use log::debug;
use ndarray::{Array1, Array2, Axis};
use num_complex::Complex;
use pyo3::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, LogNormal, StandardNormal};
use rustfft::FftPlanner;

use crate::types::SimParams;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during burst synthesis or injection.
#[derive(Debug, thiserror::Error)]
pub enum SimulateError {
    #[error("data shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("invalid sampling distribution: {0}")]
    Distribution(String),

    #[error("degenerate input: {0}")]
    Degenerate(String),
}

// ---------------------------------------------------------------------------
// FrbSimulator
// ---------------------------------------------------------------------------

/// Generator for synthetic FRB events and their noise backgrounds.
///
/// Construct with a [`SimParams`] and call [`FrbSimulator::inject`] to obtain
/// a dynamic spectrum with a burst added, together with the sampled peak SNR.
/// The intermediate products ([`FrbSimulator::pulse_profile`],
/// [`FrbSimulator::burst`]) are public so each modelling stage can be
/// inspected on its own.
#[pyclass]
#[derive(Clone, Debug)]
pub struct FrbSimulator {
    params: SimParams,
    /// Channel centre frequencies in MHz, precomputed from the params.
    frequencies: Array1<f64>,
    rng: ChaCha8Rng,
}

#[pymethods]
impl FrbSimulator {
    /// Create a new simulator seeded from `params.seed`.
    #[new]
    #[pyo3(signature = (params=None))]
    pub fn py_new(params: Option<SimParams>) -> Self {
        Self::new(params.unwrap_or_default())
    }

    /// Draw a fresh standard-normal noise background.
    ///
    /// Returns the spectrum as a flat row-major `Vec<f32>` of shape
    /// `(nfreq, ntime)` so it can be reshaped on the Python side with numpy.
    #[pyo3(name = "background")]
    pub fn py_background(&mut self) -> Vec<f32> {
        self.background().into_raw_vec()
    }

    /// Synthesize the scattered, area-normalized pulse profile.
    #[pyo3(name = "pulse_profile")]
    pub fn py_pulse_profile(&mut self) -> PyResult<Vec<f64>> {
        self.pulse_profile()
            .map(|p| p.into_raw_vec())
            .map_err(|e| pyo3::exceptions::PyRuntimeError::new_err(e.to_string()))
    }

    /// Synthesize a complete burst: pulse profile, scintillation, and random
    /// placement on the time axis.
    #[pyo3(name = "burst")]
    pub fn py_burst(&mut self) -> PyResult<Vec<f64>> {
        self.burst()
            .map(|b| b.into_raw_vec())
            .map_err(|e| pyo3::exceptions::PyRuntimeError::new_err(e.to_string()))
    }

    /// Inject a burst into `data` (flat row-major, `(nfreq, ntime)`), or into
    /// a freshly drawn background when `data` is omitted.
    ///
    /// Returns `(injected, snr)` where `injected` is flat row-major.
    #[pyo3(name = "inject", signature = (data=None))]
    pub fn py_inject(&mut self, data: Option<Vec<f32>>) -> PyResult<(Vec<f32>, f64)> {
        let background = match data {
            Some(flat) => {
                Array2::from_shape_vec((self.params.nfreq, self.params.ntime), flat)
                    .map_err(|e| pyo3::exceptions::PyValueError::new_err(e.to_string()))?
            }
            None => self.background(),
        };
        let (injected, snr) = self
            .inject(&background)
            .map_err(|e| pyo3::exceptions::PyRuntimeError::new_err(e.to_string()))?;
        Ok((injected.into_raw_vec(), snr))
    }

    fn __repr__(&self) -> String {
        format!("FrbSimulator({:?})", self.params)
    }
}

impl FrbSimulator {
    /// Create a simulator seeded from `params.seed`.
    pub fn new(params: SimParams) -> Self {
        let seed = params.seed;
        Self::with_seed(params, seed)
    }

    /// Create a simulator with an explicit stream seed, independent of
    /// `params.seed`.  Batch generation uses this to give every sample pair
    /// its own reproducible stream.
    pub fn with_seed(params: SimParams, seed: u64) -> Self {
        let frequencies = params.frequencies();
        Self {
            params,
            frequencies,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    /// Draw a `(nfreq, ntime)` background of i.i.d. standard-normal noise.
    pub fn background(&mut self) -> Array2<f32> {
        let rng = &mut self.rng;
        Array2::from_shape_fn((self.params.nfreq, self.params.ntime), |_| {
            let v: f64 = rng.sample(StandardNormal);
            v as f32
        })
    }

    /// Intrinsic pulse: one Gaussian row tiled across the band.
    ///
    /// The width is drawn uniformly from `[1, max_width)` bins.  Rows that
    /// underflow to zero in the wings get a small positive floor so the
    /// later area normalization stays well defined.
    pub fn gaussian_profile(&mut self) -> Array2<f64> {
        let nt = self.params.ntime;
        let half = (nt / 2) as f64;
        let width = self.rng.gen_range(1..self.params.max_width) as f64;

        let t = Array1::linspace(-half, half, nt);
        let mut g = t.mapv(|ti| (-(ti / width).powi(2)).exp());
        if g.iter().any(|&v| v <= 0.0) {
            g.mapv_inplace(|v| v + 1e-18);
        }

        let mut profile = Array2::<f64>::zeros((self.params.nfreq, nt));
        for mut row in profile.axis_iter_mut(Axis(0)) {
            row.assign(&g);
        }
        profile
    }

    /// Per-channel exponential scattering kernel, peak-normalized.
    ///
    /// The scattering timescale follows the thin-screen scaling
    /// `tau_nu = tau * (f / f_ref)^-4`, so low-frequency channels get long
    /// tails and high-frequency channels collapse toward a delta function.
    pub fn scatter_profile(&self) -> Array2<f64> {
        let nt = self.params.ntime;
        let t = Array1::linspace(0.0, (nt / 2) as f64, nt);

        let mut profile = Array2::<f64>::zeros((self.params.nfreq, nt));
        for (ch, mut row) in profile.axis_iter_mut(Axis(0)).enumerate() {
            let tau_nu = self.params.tau * (self.frequencies[ch] / self.params.f_ref).powi(-4);
            for (i, v) in row.iter_mut().enumerate() {
                *v = (-t[i] / tau_nu).exp() / tau_nu;
            }
            let peak = row.iter().cloned().fold(f64::MIN, f64::max);
            if peak > 0.0 {
                row.mapv_inplace(|v| v / peak);
            }
        }
        profile
    }

    /// Convolve the Gaussian and scattering profiles channel by channel and
    /// normalize each channel to unit area (trapezoidal rule, unit spacing).
    ///
    /// Higher frequencies keep narrower pulses with higher peaks; the
    /// integral over time is 1 for every channel.
    pub fn pulse_profile(&mut self) -> Result<Array2<f64>, SimulateError> {
        let nt = self.params.ntime;
        let gaussian = self.gaussian_profile();
        let scatter = self.scatter_profile();

        // The Gaussian row is identical across channels, so its transform is
        // computed once and reused for every channel convolution.
        let fft_len = (2 * nt - 1).next_power_of_two();
        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(fft_len);
        let ifft = planner.plan_fft_inverse(fft_len);

        let mut gauss_fft = to_padded_complex(gaussian.row(0).as_slice().ok_or_else(|| {
            SimulateError::Degenerate("gaussian profile row is not contiguous".into())
        })?, fft_len);
        fft.process(&mut gauss_fft);

        let mut profile = Array2::<f64>::zeros((self.params.nfreq, nt));
        for (ch, mut row) in profile.axis_iter_mut(Axis(0)).enumerate() {
            let scat_row = scatter.row(ch);
            let mut buf = to_padded_complex(scat_row.as_slice().ok_or_else(|| {
                SimulateError::Degenerate("scatter profile row is not contiguous".into())
            })?, fft_len);
            fft.process(&mut buf);

            for (b, g) in buf.iter_mut().zip(gauss_fft.iter()) {
                *b *= g;
            }
            ifft.process(&mut buf);

            let scale = 1.0 / fft_len as f64;
            for (i, v) in row.iter_mut().enumerate() {
                *v = buf[i].re * scale;
            }

            let area = trapezoid(row.as_slice().ok_or_else(|| {
                SimulateError::Degenerate("pulse profile row is not contiguous".into())
            })?);
            if area <= 0.0 || !area.is_finite() {
                return Err(SimulateError::Degenerate(format!(
                    "channel {} pulse integrates to {}",
                    ch, area
                )));
            }
            row.mapv_inplace(|v| v / area);
        }

        Ok(profile)
    }

    /// Apply spectral scintillation to a pulse profile.
    ///
    /// The brightness envelope across the band is a cosine of
    /// `(f / f_ref)^-2` with a random phase; the number of scintils is drawn
    /// log-uniformly and snapped to zero below one, which leaves a flat
    /// envelope.  Negative lobes are clipped and a 0.1 floor keeps every
    /// channel weakly illuminated.
    pub fn scintillate(&mut self, pulse: &mut Array2<f64>) {
        let phi: f64 = self.rng.gen();
        let mut nscint = f64::exp(self.rng.gen_range((1e-3f64).ln()..(7.0f64).ln()));
        if nscint < 1.0 {
            nscint = 0.0;
        }
        debug!("scintillation: nscint={:.3}, phase={:.3}", nscint, phi);

        for (ch, mut row) in pulse.axis_iter_mut(Axis(0)).enumerate() {
            let arg = 2.0 * std::f64::consts::PI * nscint
                * (self.frequencies[ch] / self.params.f_ref).powi(-2)
                + phi;
            let envelope = arg.cos().max(0.0) + 0.1;
            row.mapv_inplace(|v| v * envelope);
        }
    }

    /// Circularly shift a burst along the time axis by a random offset in
    /// `[-ntime/2 + max_width, ntime/2 - max_width)`.
    pub fn roll(&mut self, frb: &Array2<f64>) -> Array2<f64> {
        let half = (self.params.ntime / 2) as i64;
        let bound = half - self.params.max_width as i64;
        let shift = self.rng.gen_range(-bound..bound);
        roll_time(frb, shift as isize)
    }

    /// Synthesize a complete burst: scattered pulse profile, scintillation,
    /// random time placement.
    pub fn burst(&mut self) -> Result<Array2<f64>, SimulateError> {
        let mut pulse = self.pulse_profile()?;
        self.scintillate(&mut pulse);
        Ok(self.roll(&pulse))
    }

    /// Add a burst to `background`, returning the injected spectrum and the
    /// sampled peak SNR.  The input background is left untouched.
    ///
    /// The peak SNR is `snr_min + LogNormal(1, snr_sigma)`, scaled by the
    /// standard deviation of the background's per-time-bin mean profile.
    /// The burst lands on a random contiguous band covering a uniform
    /// 50–90 % fraction of the frequency channels.
    pub fn inject(&mut self, background: &Array2<f32>) -> Result<(Array2<f32>, f64), SimulateError> {
        let expected = (self.params.nfreq, self.params.ntime);
        if background.dim() != expected {
            return Err(SimulateError::ShapeMismatch {
                expected: format!("{:?}", expected),
                actual: format!("{:?}", background.dim()),
            });
        }

        let frb = self.burst()?;

        // Scale relative to the band-averaged time series, as the matched
        // filter in a single-beam search would see it.
        let mean_profile = background
            .mean_axis(Axis(0))
            .ok_or_else(|| SimulateError::Degenerate("background has no channels".into()))?;
        let sigma = mean_profile.std(0.0) as f64;

        let log_normal = LogNormal::new(1.0, self.params.snr_sigma)
            .map_err(|e| SimulateError::Distribution(e.to_string()))?;
        let snr = self.params.snr_min + log_normal.sample(&mut self.rng);
        let peak = snr * sigma;

        // Partial-band injection: real bursts rarely light up the full band.
        let frac = self.rng.gen_range(0.5..0.9);
        let n_band = ((self.params.nfreq as f64 * frac) as usize).max(1);
        let max_start = self.params.nfreq - n_band;
        let start_ch = if max_start == 0 {
            0
        } else {
            self.rng.gen_range(0..max_start)
        };

        debug!(
            "injecting burst: snr={:.2}, channels {}..{}",
            snr,
            start_ch,
            start_ch + n_band
        );

        let mut injected = background.clone();
        for ch in start_ch..start_ch + n_band {
            for t in 0..self.params.ntime {
                injected[[ch, t]] += (peak * frb[[ch, t]]) as f32;
            }
        }

        Ok((injected, snr))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Copy a real signal into a zero-padded complex buffer of length `len`.
fn to_padded_complex(signal: &[f64], len: usize) -> Vec<Complex<f64>> {
    let mut buf = vec![Complex::new(0.0, 0.0); len];
    for (b, &s) in buf.iter_mut().zip(signal.iter()) {
        b.re = s;
    }
    buf
}

/// Trapezoidal integral with unit sample spacing.
fn trapezoid(y: &[f64]) -> f64 {
    if y.len() < 2 {
        return 0.0;
    }
    let sum: f64 = y.iter().sum();
    sum - (y[0] + y[y.len() - 1]) / 2.0
}

/// Circularly shift every row of `data` along the time axis; positive shifts
/// move samples toward later bins, wrapping at the edges.
fn roll_time(data: &Array2<f64>, shift: isize) -> Array2<f64> {
    let (nchan, nt) = data.dim();
    let mut out = Array2::<f64>::zeros((nchan, nt));
    for ch in 0..nchan {
        for t in 0..nt {
            let dst = (t as isize + shift).rem_euclid(nt as isize) as usize;
            out[[ch, dst]] = data[[ch, t]];
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::arr2;

    fn simulator(seed: u64) -> FrbSimulator {
        let mut params = SimParams::default();
        params.seed = seed;
        FrbSimulator::new(params)
    }

    #[test]
    fn trapezoid_matches_closed_form() {
        // y = x over [0, 3] integrates to 4.5.
        assert_abs_diff_eq!(trapezoid(&[0.0, 1.0, 2.0, 3.0]), 4.5);
    }

    #[test]
    fn roll_wraps_and_preserves_values() {
        let data = arr2(&[[1.0, 2.0, 3.0, 4.0]]);
        let rolled = roll_time(&data, 1);
        assert_eq!(rolled, arr2(&[[4.0, 1.0, 2.0, 3.0]]));

        let back = roll_time(&rolled, -1);
        assert_eq!(back, data);
    }

    #[test]
    fn background_matches_configured_shape() {
        let mut sim = simulator(1);
        let bg = sim.background();
        assert_eq!(bg.dim(), (64, 256));
    }

    #[test]
    fn scatter_profile_peaks_at_unity() {
        let sim = simulator(2);
        let scat = sim.scatter_profile();
        for row in scat.axis_iter(Axis(0)) {
            let peak = row.iter().cloned().fold(f64::MIN, f64::max);
            assert_relative_eq!(peak, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn pulse_profile_rows_integrate_to_unit_area() {
        let mut sim = simulator(3);
        let pulse = sim.pulse_profile().unwrap();
        assert_eq!(pulse.dim(), (64, 256));
        for row in pulse.axis_iter(Axis(0)) {
            let area = trapezoid(row.as_slice().unwrap());
            assert_relative_eq!(area, 1.0, epsilon = 1e-8);
        }
    }

    #[test]
    fn burst_is_nonnegative_and_finite() {
        let mut sim = simulator(4);
        let burst = sim.burst().unwrap();
        assert!(burst.iter().all(|&v| v.is_finite() && v >= 0.0));
    }

    #[test]
    fn injection_preserves_shape_and_background() {
        let mut sim = simulator(5);
        let bg = sim.background();
        let bg_copy = bg.clone();
        let (injected, snr) = sim.inject(&bg).unwrap();

        assert_eq!(injected.dim(), bg.dim());
        assert_eq!(bg, bg_copy);
        assert!(snr >= sim.params().snr_min);

        // The burst only ever adds power.
        let added: f32 = injected
            .iter()
            .zip(bg.iter())
            .map(|(&a, &b)| a - b)
            .fold(0.0, |acc, d| {
                assert!(d >= -1e-6);
                acc + d
            });
        assert!(added > 0.0);
    }

    #[test]
    fn injection_rejects_mismatched_background() {
        let mut sim = simulator(6);
        let wrong = Array2::<f32>::zeros((32, 256));
        assert!(matches!(
            sim.inject(&wrong),
            Err(SimulateError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn fixed_seed_reproduces_everything() {
        let mut a = simulator(42);
        let mut b = simulator(42);

        assert_eq!(a.background(), b.background());
        let (inj_a, snr_a) = {
            let bg = a.background();
            a.inject(&bg).unwrap()
        };
        let (inj_b, snr_b) = {
            let bg = b.background();
            b.inject(&bg).unwrap()
        };
        assert_eq!(inj_a, inj_b);
        assert_eq!(snr_a, snr_b);
    }

    #[test]
    fn fft_convolution_matches_direct_convolution() {
        // Convolve two short sequences through the same padded-FFT path the
        // pulse synthesis uses and compare against the O(n*m) sum.
        let a = [1.0, 2.0, 3.0, 0.0];
        let b = [0.5, 0.25, 0.0, 0.0];
        let n = a.len() + b.len() - 1;
        let fft_len = n.next_power_of_two();

        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(fft_len);
        let ifft = planner.plan_fft_inverse(fft_len);

        let mut fa = to_padded_complex(&a, fft_len);
        let mut fb = to_padded_complex(&b, fft_len);
        fft.process(&mut fa);
        fft.process(&mut fb);
        for (x, y) in fa.iter_mut().zip(fb.iter()) {
            *x *= y;
        }
        ifft.process(&mut fa);

        for k in 0..n {
            let direct: f64 = (0..=k)
                .filter(|&i| i < a.len() && k - i < b.len())
                .map(|i| a[i] * b[k - i])
                .sum();
            assert_abs_diff_eq!(fa[k].re / fft_len as f64, direct, epsilon = 1e-10);
        }
    }
}
