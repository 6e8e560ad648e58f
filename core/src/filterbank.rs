//! Filterbank and HDF5 file readers for radio-telescope spectrogram data.
//!
//! Real RFI backgrounds for classifier training come from observations
//! stored in one of two formats:
//!
//! - **Sigproc filterbank** (`.fil`) — a simple binary format with a
//!   self-describing header followed by raw spectral data.
//! - **HDF5** (`.h5`) — the same data in an HDF5 container with the
//!   spectrogram in a dataset called `"data"` and metadata as attributes.
//!
//! This module provides a [`FilterbankIO`] trait and concrete
//! implementations ([`SigprocReader`] and, behind the `hdf5-support`
//! feature, [`Hdf5Reader`]) so additional formats can be added later.  The
//! high-level [`FilterbankReader`] auto-detects the format from the file
//! extension and delegates to the appropriate backend.  [`fscrunch`]
//! averages adjacent channels down to the coarser resolution the training
//! pipeline works at.

use std::fs::File;
use std::io::{BufReader, Read as IoRead};
use std::path::Path;

use ndarray::{Array2, Axis};
use pyo3::prelude::*;

use crate::types::FilterbankHeader;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while reading filterbank or HDF5 files.
#[derive(Debug, thiserror::Error)]
pub enum FilterbankError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid filterbank header: {0}")]
    BadHeader(String),

    #[error("HDF5 error: {0}")]
    Hdf5(String),

    #[error("data shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("cannot scrunch {nchans} channels into {nsub} subbands")]
    BadScrunch { nchans: usize, nsub: usize },
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Abstract interface for reading a spectrogram and its header from a file.
///
/// Implement this trait to add support for new file formats.
pub trait FilterbankIO {
    /// Read the file at `path` and return the header plus a 2-D array of
    /// shape `(n_timesteps, n_channels)` in `f32` power units.
    fn read(&self, path: &str) -> Result<(FilterbankHeader, Array2<f32>), FilterbankError>;
}

// ---------------------------------------------------------------------------
// Sigproc .fil reader
// ---------------------------------------------------------------------------

/// Sigproc header keywords whose value is a 32-bit integer.  Everything
/// else (apart from strings) is an 8-byte double.
const INT_KEYWORDS: &[&str] = &[
    "telescope_id",
    "machine_id",
    "data_type",
    "barycentric",
    "pulsarcentric",
    "nbits",
    "nsamples",
    "nchans",
    "nifs",
    "nbeams",
    "ibeam",
];

/// Sigproc header keywords whose value is another length-prefixed string.
const STRING_KEYWORDS: &[&str] = &["source_name", "rawdatafile"];

/// Reader for the classic sigproc filterbank binary format.
///
/// The format starts with the string `"HEADER_START"`, followed by a
/// sequence of keyword–value pairs, and terminated by `"HEADER_END"`.
/// The remainder of the file is raw spectral data, one full spectrum per
/// time step in channel order.
pub struct SigprocReader;

impl SigprocReader {
    /// Read a length-prefixed keyword string from the stream.
    fn read_keyword(reader: &mut BufReader<File>) -> Result<String, FilterbankError> {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf)?;
        let len = u32::from_le_bytes(len_buf) as usize;

        if len == 0 || len > 1024 {
            return Err(FilterbankError::BadHeader(format!(
                "keyword length {} outside sanity range",
                len
            )));
        }

        let mut str_buf = vec![0u8; len];
        reader.read_exact(&mut str_buf)?;
        Ok(String::from_utf8_lossy(&str_buf).to_string())
    }

    fn read_double(reader: &mut BufReader<File>) -> Result<f64, FilterbankError> {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }

    fn read_int(reader: &mut BufReader<File>) -> Result<i32, FilterbankError> {
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    /// Parse the keyword stream between `HEADER_START` and `HEADER_END`.
    fn parse_header(reader: &mut BufReader<File>) -> Result<FilterbankHeader, FilterbankError> {
        let magic = Self::read_keyword(reader)?;
        if magic != "HEADER_START" {
            return Err(FilterbankError::BadHeader(
                "file does not start with HEADER_START".into(),
            ));
        }

        let mut nchans: usize = 0;
        let mut nifs: usize = 1;
        let mut nbits: u32 = 32;
        let mut tsamp: f64 = 0.0;
        let mut fch1: f64 = 0.0;
        let mut foff: f64 = 0.0;
        let mut tstart: f64 = 0.0;
        let mut source_name = String::new();
        let mut ra: f64 = 0.0;
        let mut dec: f64 = 0.0;

        loop {
            let keyword = Self::read_keyword(reader)?;
            match keyword.as_str() {
                "HEADER_END" => break,
                "nchans" => nchans = Self::read_int(reader)? as usize,
                "nifs" => nifs = Self::read_int(reader)? as usize,
                "nbits" => nbits = Self::read_int(reader)? as u32,
                "tsamp" => tsamp = Self::read_double(reader)?,
                "fch1" => fch1 = Self::read_double(reader)?,
                "foff" => foff = Self::read_double(reader)?,
                "tstart" => tstart = Self::read_double(reader)?,
                "source_name" => source_name = Self::read_keyword(reader)?,
                "src_raj" => ra = Self::read_double(reader)?,
                "src_dej" => dec = Self::read_double(reader)?,
                other => {
                    // Unknown keywords are skipped by their declared sigproc
                    // value type so the stream stays aligned.
                    if INT_KEYWORDS.contains(&other) {
                        Self::read_int(reader)?;
                    } else if STRING_KEYWORDS.contains(&other) {
                        Self::read_keyword(reader)?;
                    } else {
                        Self::read_double(reader)?;
                    }
                }
            }
        }

        if nchans == 0 {
            return Err(FilterbankError::BadHeader("nchans is 0".into()));
        }

        Ok(FilterbankHeader {
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
        })
    }

    /// Decode the raw sample stream that follows the header.
    fn decode_samples(raw: &[u8], nbits: u32) -> Result<Vec<f32>, FilterbankError> {
        match nbits {
            8 => Ok(raw.iter().map(|&b| b as f32).collect()),
            16 => Ok(raw
                .chunks_exact(2)
                .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32)
                .collect()),
            32 => Ok(raw
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()),
            other => Err(FilterbankError::BadHeader(format!(
                "unsupported nbits={}",
                other
            ))),
        }
    }
}

impl FilterbankIO for SigprocReader {
    fn read(&self, path: &str) -> Result<(FilterbankHeader, Array2<f32>), FilterbankError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let header = Self::parse_header(&mut reader)?;

        let mut raw_bytes = Vec::new();
        reader.read_to_end(&mut raw_bytes)?;

        let data = Self::decode_samples(&raw_bytes, header.nbits)?;
        // Whole spectra only; a truncated trailing spectrum is dropped.
        let n_times = data.len() / header.nchans;
        let data = &data[..n_times * header.nchans];

        let array = Array2::from_shape_vec((n_times, header.nchans), data.to_vec()).map_err(
            |e| FilterbankError::ShapeMismatch {
                expected: format!("({}, {})", n_times, header.nchans),
                actual: e.to_string(),
            },
        )?;

        Ok((header, array))
    }
}

// ---------------------------------------------------------------------------
// Channel scrunching
// ---------------------------------------------------------------------------

/// Average adjacent frequency channels of a `(n_times, nchans)` spectrogram
/// down to `nsub` subbands.  `nchans` must divide evenly into `nsub` groups.
pub fn fscrunch(data: &Array2<f32>, nsub: usize) -> Result<Array2<f32>, FilterbankError> {
    let (n_times, nchans) = data.dim();
    if nsub == 0 || nchans % nsub != 0 {
        return Err(FilterbankError::BadScrunch { nchans, nsub });
    }
    let factor = nchans / nsub;
    if factor == 1 {
        return Ok(data.clone());
    }

    let mut out = Array2::<f32>::zeros((n_times, nsub));
    for (t, row) in data.axis_iter(Axis(0)).enumerate() {
        for sub in 0..nsub {
            let mut acc = 0.0f32;
            for k in 0..factor {
                acc += row[sub * factor + k];
            }
            out[[t, sub]] = acc / factor as f32;
        }
    }
    Ok(out)
}

/// Centre frequencies (MHz) of the subbands produced by [`fscrunch`].
pub fn subband_frequencies(
    header: &FilterbankHeader,
    nsub: usize,
) -> Result<Vec<f64>, FilterbankError> {
    if nsub == 0 || header.nchans % nsub != 0 {
        return Err(FilterbankError::BadScrunch {
            nchans: header.nchans,
            nsub,
        });
    }
    let factor = header.nchans / nsub;
    Ok((0..nsub)
        .map(|sub| {
            // Mean of the member channel frequencies.
            header.fch1 + (sub * factor) as f64 * header.foff
                + (factor as f64 - 1.0) / 2.0 * header.foff
        })
        .collect())
}

// ---------------------------------------------------------------------------
// HDF5 .h5 reader
// ---------------------------------------------------------------------------

/// HDF5 reader, available when compiled with the `hdf5-support` feature.
#[cfg(feature = "hdf5-support")]
pub struct Hdf5Reader;

#[cfg(feature = "hdf5-support")]
impl FilterbankIO for Hdf5Reader {
    fn read(&self, path: &str) -> Result<(FilterbankHeader, Array2<f32>), FilterbankError> {
        let file = hdf5::File::open(path).map_err(|e| FilterbankError::Hdf5(e.to_string()))?;
        let root = file
            .group("/")
            .map_err(|e| FilterbankError::Hdf5(e.to_string()))?;

        let nchans = read_attr_usize(&root, "nchans")?;
        let nifs = read_attr_usize(&root, "nifs").unwrap_or(1);
        let nbits = read_attr_u32(&root, "nbits").unwrap_or(32);
        let tsamp = read_attr_f64(&root, "tsamp")?;
        let fch1 = read_attr_f64(&root, "fch1")?;
        let foff = read_attr_f64(&root, "foff")?;
        let tstart = read_attr_f64(&root, "tstart")?;
        let source_name = read_attr_string(&root, "source_name").unwrap_or_default();
        let ra = read_attr_f64(&root, "src_raj").unwrap_or(0.0);
        let dec = read_attr_f64(&root, "src_dej").unwrap_or(0.0);

        let header = FilterbankHeader {
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
        };

        let dataset = file
            .dataset("data")
            .map_err(|e| FilterbankError::Hdf5(e.to_string()))?;
        let flat: Vec<f32> = dataset
            .read_raw()
            .map_err(|e| FilterbankError::Hdf5(e.to_string()))?;
        let n_times = flat.len() / (nifs * nchans);
        let data: Vec<f32> = if nifs == 1 {
            flat
        } else {
            // Keep only the first IF stream of each frame.
            flat.chunks(nifs * nchans)
                .flat_map(|frame| frame[..nchans].iter().copied())
                .collect()
        };

        let array = Array2::from_shape_vec((n_times, nchans), data).map_err(|e| {
            FilterbankError::ShapeMismatch {
                expected: format!("({}, {})", n_times, nchans),
                actual: e.to_string(),
            }
        })?;
        Ok((header, array))
    }
}

#[cfg(feature = "hdf5-support")]
fn read_attr_f64(group: &hdf5::Group, name: &str) -> Result<f64, FilterbankError> {
    let attr = group
        .attr(name)
        .map_err(|e| FilterbankError::Hdf5(format!("missing attribute '{}': {}", name, e)))?;
    attr.read_scalar::<f64>()
        .map_err(|e| FilterbankError::Hdf5(format!("cannot read '{}' as f64: {}", name, e)))
}

#[cfg(feature = "hdf5-support")]
fn read_attr_usize(group: &hdf5::Group, name: &str) -> Result<usize, FilterbankError> {
    read_attr_f64(group, name).map(|v| v as usize)
}

#[cfg(feature = "hdf5-support")]
fn read_attr_u32(group: &hdf5::Group, name: &str) -> Result<u32, FilterbankError> {
    read_attr_f64(group, name).map(|v| v as u32)
}

#[cfg(feature = "hdf5-support")]
fn read_attr_string(group: &hdf5::Group, name: &str) -> Result<String, FilterbankError> {
    let attr = group
        .attr(name)
        .map_err(|e| FilterbankError::Hdf5(format!("missing attribute '{}': {}", name, e)))?;
    attr.read_scalar::<hdf5::types::VarLenUnicode>()
        .map(|s| s.to_string())
        .or_else(|_| {
            attr.read_scalar::<hdf5::types::FixedUnicode<256>>()
                .map(|s| s.to_string())
        })
        .map_err(|e| FilterbankError::Hdf5(format!("cannot read '{}' as string: {}", name, e)))
}

// ---------------------------------------------------------------------------
// High-level reader with format auto-detection (Python-exposed)
// ---------------------------------------------------------------------------

/// Auto-detecting filterbank reader.
///
/// Given a file path, [`FilterbankReader`] inspects the extension (`.fil`
/// or `.h5`) and delegates to the appropriate backend.
#[pyclass]
#[derive(Clone, Debug)]
pub struct FilterbankReader;

#[pymethods]
impl FilterbankReader {
    #[new]
    pub fn new() -> Self {
        Self
    }

    /// Read a filterbank file and return `(header, flat_data, n_times, n_chans)`.
    ///
    /// The spectrogram is returned as a flat `Vec<f32>` in row-major order
    /// so it can easily be reshaped on the Python side with numpy.
    #[pyo3(name = "read")]
    pub fn py_read(&self, path: &str) -> PyResult<(FilterbankHeader, Vec<f32>, usize, usize)> {
        let (header, array) = self
            .read(path)
            .map_err(|e| pyo3::exceptions::PyIOError::new_err(e.to_string()))?;
        let (n_times, n_chans) = array.dim();
        let flat = array.into_raw_vec();
        Ok((header, flat, n_times, n_chans))
    }

    fn __repr__(&self) -> String {
        "FilterbankReader()".to_string()
    }
}

impl Default for FilterbankReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterbankReader {
    /// Read a filterbank or HDF5 file and return the header and data array.
    pub fn read(&self, path: &str) -> Result<(FilterbankHeader, Array2<f32>), FilterbankError> {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match ext {
            "fil" => SigprocReader.read(path),
            #[cfg(feature = "hdf5-support")]
            "h5" | "hdf5" => Hdf5Reader.read(path),
            #[cfg(not(feature = "hdf5-support"))]
            "h5" | "hdf5" => Err(FilterbankError::UnsupportedFormat(
                "HDF5 support not compiled in".to_string(),
            )),
            other => Err(FilterbankError::UnsupportedFormat(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::arr2;
    use std::io::Write;
    use std::path::PathBuf;

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

    /// Write a minimal 32-bit sigproc file with `n_times` spectra of
    /// `nchans` channels, sample value = `t * nchans + c`.
    fn write_test_fil(dir: &Path, nchans: usize, n_times: usize) -> PathBuf {
        let mut buf = Vec::new();
        put_string(&mut buf, "HEADER_START");
        put_string(&mut buf, "source_name");
        put_string(&mut buf, "FAKE");
        put_int(&mut buf, "telescope_id", 6);
        put_int(&mut buf, "nchans", nchans as i32);
        put_int(&mut buf, "nbits", 32);
        put_int(&mut buf, "nifs", 1);
        put_double(&mut buf, "tsamp", 1e-3);
        put_double(&mut buf, "fch1", 1500.0);
        put_double(&mut buf, "foff", -1.0);
        put_double(&mut buf, "tstart", 58000.0);
        // An unknown double-valued keyword must be skipped cleanly.
        put_double(&mut buf, "az_start", 12.5);
        put_string(&mut buf, "HEADER_END");

        for t in 0..n_times {
            for c in 0..nchans {
                let v = (t * nchans + c) as f32;
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }

        let path = dir.join("synthetic.fil");
        let mut f = File::create(&path).unwrap();
        f.write_all(&buf).unwrap();
        path
    }

    #[test]
    fn sigproc_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_fil(dir.path(), 4, 6);

        let (header, data) = SigprocReader.read(path.to_str().unwrap()).unwrap();
        assert_eq!(header.nchans, 4);
        assert_eq!(header.nbits, 32);
        assert_eq!(header.source_name, "FAKE");
        assert_relative_eq!(header.fch1, 1500.0);
        assert_relative_eq!(header.foff, -1.0);

        assert_eq!(data.dim(), (6, 4));
        assert_relative_eq!(data[[0, 0]], 0.0);
        assert_relative_eq!(data[[5, 3]], 23.0);
    }

    #[test]
    fn rejects_file_without_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.fil");
        let mut buf = Vec::new();
        put_string(&mut buf, "NOT_A_HEADER");
        File::create(&path).unwrap().write_all(&buf).unwrap();

        assert!(matches!(
            SigprocReader.read(path.to_str().unwrap()),
            Err(FilterbankError::BadHeader(_))
        ));
    }

    #[test]
    fn reader_rejects_unknown_extension() {
        assert!(matches!(
            FilterbankReader::new().read("observation.dat"),
            Err(FilterbankError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn fscrunch_averages_channel_groups() {
        let data = arr2(&[[1.0f32, 3.0, 5.0, 7.0], [2.0, 4.0, 6.0, 8.0]]);
        let out = fscrunch(&data, 2).unwrap();
        assert_eq!(out, arr2(&[[2.0f32, 6.0], [3.0, 7.0]]));
    }

    #[test]
    fn fscrunch_rejects_indivisible_groups() {
        let data = Array2::<f32>::zeros((2, 6));
        assert!(matches!(
            fscrunch(&data, 4),
            Err(FilterbankError::BadScrunch { .. })
        ));
        assert!(fscrunch(&data, 0).is_err());
    }

    #[test]
    fn subband_frequencies_are_group_means() {
        let header = FilterbankHeader::new(
            4,
            1,
            32,
            1e-3,
            1500.0,
            -1.0,
            58000.0,
            "FAKE".to_string(),
            0.0,
            0.0,
        );
        let freqs = subband_frequencies(&header, 2).unwrap();
        // Channels (1500, 1499) and (1498, 1497).
        assert_relative_eq!(freqs[0], 1499.5);
        assert_relative_eq!(freqs[1], 1497.5);
    }
}
