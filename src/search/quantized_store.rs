//! Corpus embedding store with a full-precision and an int8 packed representation.
//!
//! The baseline is a row-major f32 slab of unit-norm vectors. The packed form
//! keeps one i8 code per component plus one inverse scale per row:
//!
//! ```text
//! scale         = 127 / (max(|row|) + ε)
//! code          = clamp(round(x * scale), -127, 127)
//! reconstructed = code * (1 / scale)
//! ```
//!
//! so the largest-magnitude component of every row lands on ±127 and the
//! per-component reconstruction error stays within `0.5 / scale`.
//!
//! Unpacking is never cached. Searching the packed representation pays the
//! unpack cost on every call, which the controller accounts for through its
//! `use_packed_store` knob.

use std::borrow::Cow;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::{Result, RetrievalError};

/// Largest code magnitude of the symmetric int8 range.
pub const PACK_CLAMP_MAX: f32 = 127.0;

/// Added to the row max before dividing so all-tiny rows do not blow up the scale.
pub const PACK_EPSILON: f32 = 1e-8;

/// Norms at or below this are treated as zero vectors.
pub const DEGENERATE_NORM: f32 = 1e-6;

/// Rows below this count are packed on the calling thread.
const PARALLEL_PACK_THRESHOLD: usize = 4_096;

/// Which representation of the corpus a search should run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Representation {
    Full,
    Packed,
}

impl Representation {
    pub fn bytes_per_component(self) -> usize {
        match self {
            Representation::Full => 4,
            Representation::Packed => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Representation::Full => "full",
            Representation::Packed => "packed",
        }
    }
}

/// N row vectors of dimension D stored contiguously.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    dimension: usize,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    /// Wrap a row-major slab. `data.len()` must be a multiple of `dimension`.
    pub fn from_flat(dimension: usize, data: Vec<f32>) -> Result<Self> {
        if dimension == 0 {
            return Err(RetrievalError::invalid("dimension must be non-zero"));
        }
        if data.len() % dimension != 0 {
            return Err(RetrievalError::invalid(format!(
                "slab length {} is not a multiple of dimension {dimension}",
                data.len()
            )));
        }
        Ok(Self { dimension, data })
    }

    /// Build from individual rows; all rows must share one dimension.
    pub fn from_rows<I, R>(rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[f32]>,
    {
        let mut dimension = None;
        let mut data = Vec::new();
        for (idx, row) in rows.into_iter().enumerate() {
            let row = row.as_ref();
            match dimension {
                None => dimension = Some(row.len()),
                Some(dim) if dim != row.len() => {
                    return Err(RetrievalError::invalid(format!(
                        "row {idx} dimension mismatch: expected {dim}, got {}",
                        row.len()
                    )));
                }
                Some(_) => {}
            }
            data.extend_from_slice(row);
        }
        match dimension {
            Some(dim) => Self::from_flat(dim, data),
            None => Err(RetrievalError::invalid("matrix has no rows")),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.data.len() / self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn row(&self, idx: usize) -> Option<&[f32]> {
        let start = idx.checked_mul(self.dimension)?;
        self.data.get(start..start.checked_add(self.dimension)?)
    }

    pub fn rows(&self) -> std::slice::ChunksExact<'_, f32> {
        self.data.chunks_exact(self.dimension)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn memory_bytes(&self) -> usize {
        self.data.len() * Representation::Full.bytes_per_component()
    }
}

/// Int8 codes plus one inverse scale per row.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedMatrix {
    dimension: usize,
    codes: Vec<i8>,
    inverse_scales: Vec<f32>,
}

impl PackedMatrix {
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.inverse_scales.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inverse_scales.is_empty()
    }

    pub fn row_codes(&self, idx: usize) -> Option<&[i8]> {
        let start = idx.checked_mul(self.dimension)?;
        self.codes.get(start..start.checked_add(self.dimension)?)
    }

    pub fn inverse_scale(&self, idx: usize) -> Option<f32> {
        self.inverse_scales.get(idx).copied()
    }

    pub fn memory_bytes(&self) -> usize {
        self.codes.len() * Representation::Packed.bytes_per_component()
            + self.inverse_scales.len() * std::mem::size_of::<f32>()
    }
}

/// Per-row scale for a row: maps the largest magnitude onto the int8 boundary.
pub fn row_scale(row: &[f32]) -> f32 {
    let max_abs = row.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
    PACK_CLAMP_MAX / (max_abs + PACK_EPSILON)
}

fn pack_row(row: &[f32], codes: &mut [i8]) -> f32 {
    let scale = row_scale(row);
    for (code, &value) in codes.iter_mut().zip(row) {
        *code = (value * scale)
            .round()
            .clamp(-PACK_CLAMP_MAX, PACK_CLAMP_MAX) as i8;
    }
    1.0 / scale
}

/// Quantize every row of `matrix` to int8 with per-row rescaling.
pub fn pack(matrix: &EmbeddingMatrix) -> PackedMatrix {
    let dimension = matrix.dimension();
    let mut codes = vec![0i8; matrix.as_slice().len()];
    let mut inverse_scales = vec![0.0f32; matrix.len()];

    if matrix.len() >= PARALLEL_PACK_THRESHOLD {
        codes
            .par_chunks_mut(dimension)
            .zip(inverse_scales.par_iter_mut())
            .zip(matrix.as_slice().par_chunks(dimension))
            .for_each(|((out, inv), row)| *inv = pack_row(row, out));
    } else {
        for ((out, inv), row) in codes
            .chunks_mut(dimension)
            .zip(inverse_scales.iter_mut())
            .zip(matrix.rows())
        {
            *inv = pack_row(row, out);
        }
    }

    PackedMatrix {
        dimension,
        codes,
        inverse_scales,
    }
}

/// Reconstruct an f32 matrix from its packed form. Lossy.
pub fn unpack(packed: &PackedMatrix) -> EmbeddingMatrix {
    let dimension = packed.dimension;
    let data: Vec<f32> = packed
        .codes
        .chunks_exact(dimension)
        .zip(&packed.inverse_scales)
        .flat_map(|(codes, &inv)| codes.iter().map(move |&c| f32::from(c) * inv))
        .collect();
    EmbeddingMatrix { dimension, data }
}

/// L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Owns the corpus in both representations.
#[derive(Debug)]
pub struct QuantizedStore {
    baseline: EmbeddingMatrix,
    packed: PackedMatrix,
}

impl QuantizedStore {
    /// Validate the corpus and derive the packed representation.
    pub fn build(corpus: EmbeddingMatrix, config: &StoreConfig) -> Result<Self> {
        if corpus.is_empty() {
            return Err(RetrievalError::invalid("corpus is empty"));
        }
        for (idx, row) in corpus.rows().enumerate() {
            if let Some(pos) = row.iter().position(|v| !v.is_finite()) {
                return Err(RetrievalError::invalid(format!(
                    "row {idx} has a non-finite component at {pos}"
                )));
            }
            let norm = l2_norm(row);
            if norm <= DEGENERATE_NORM {
                return Err(RetrievalError::degenerate(format!("corpus row {idx}"), norm));
            }
            if (norm - 1.0).abs() > config.norm_tolerance {
                return Err(RetrievalError::invalid(format!(
                    "row {idx} is not unit-normalized (norm {norm}, tolerance {})",
                    config.norm_tolerance
                )));
            }
        }

        let packed = pack(&corpus);
        debug!(
            rows = corpus.len(),
            dimension = corpus.dimension(),
            full_bytes = corpus.memory_bytes(),
            packed_bytes = packed.memory_bytes(),
            "built quantized store"
        );
        Ok(Self {
            baseline: corpus,
            packed,
        })
    }

    pub fn len(&self) -> usize {
        self.baseline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.baseline.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.baseline.dimension()
    }

    pub fn baseline(&self) -> &EmbeddingMatrix {
        &self.baseline
    }

    pub fn packed(&self) -> &PackedMatrix {
        &self.packed
    }

    /// Recompute the packed form from the baseline.
    pub fn pack(&self) -> PackedMatrix {
        pack(&self.baseline)
    }

    /// The matrix a search should scan for `repr`. `Packed` unpacks on every call.
    pub fn view(&self, repr: Representation) -> Cow<'_, EmbeddingMatrix> {
        match repr {
            Representation::Full => Cow::Borrowed(&self.baseline),
            Representation::Packed => Cow::Owned(unpack(&self.packed)),
        }
    }

    pub fn memory_bytes(&self, repr: Representation) -> usize {
        match repr {
            Representation::Full => self.baseline.memory_bytes(),
            Representation::Packed => self.packed.memory_bytes(),
        }
    }
}
