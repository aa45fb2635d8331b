//! Field layout inference
//!
//! The particle location block of a cryoSPARC record is four consecutive fields:
//! the micrograph path, the micrograph shape `[height, width]` and the fractional
//! `x` and `y` pick coordinates. The block is found by sliding a [ProbeRule] over the
//! first record of a batch.
//!
//! A structurally similar block earlier in the record would be matched instead, the
//! probe has no way to tell them apart.

use crate::record::{FieldValue, Record, RecordError};

#[derive(thiserror::Error, Debug)]
pub enum SchemaError {
    #[error("no [text, micrograph shape, x fraction, y fraction] field block in the record")]
    LocationBlock,
    #[error("no field of the record contains the job identifier {0:?}")]
    MicrographField(String),
    #[error("no integer particle identifier field in the record")]
    ParticleId,
    #[error("expected at least 2 array fields in the record, found {0}")]
    ArrayFields(usize),
    #[error("cannot infer a field layout from an empty batch")]
    EmptyBatch,
    #[error("failed to decode a record field")]
    Record(#[from] RecordError),
}
type Result<T> = std::result::Result<T, SchemaError>;

/// Micrograph dimensions are above this many pixels
pub const MIN_MICROGRAPH_SIDE: f64 = 1000.;

/// Per-field test of a [ProbeRule]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldPredicate {
    /// Decodes as text
    Text,
    /// A 2-element integer array with both elements above the threshold
    NumericPairAbove(f64),
    /// A float no larger than 1
    FractionBounded,
    /// A scalar integer
    Integer,
}
impl FieldPredicate {
    pub fn matches(&self, value: &FieldValue) -> bool {
        match self {
            FieldPredicate::Text => value.as_text().is_some(),
            FieldPredicate::NumericPairAbove(threshold) => match value.as_array() {
                Some([a, b]) => [a, b]
                    .iter()
                    .all(|v| v.is_integer() && v.as_f64().is_some_and(|v| v > *threshold)),
                _ => false,
            },
            FieldPredicate::FractionBounded => {
                value.is_float() && value.as_f64().is_some_and(|v| v <= 1.)
            }
            FieldPredicate::Integer => value.is_integer(),
        }
    }
}

/// A window of consecutive field predicates
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRule(Vec<FieldPredicate>);
impl ProbeRule {
    pub fn new(predicates: Vec<FieldPredicate>) -> Self {
        Self(predicates)
    }
    /// Micrograph path, micrograph shape, x and y fractions
    pub fn location_block() -> Self {
        use FieldPredicate::*;
        Self(vec![
            Text,
            NumericPairAbove(MIN_MICROGRAPH_SIDE),
            FractionBounded,
            FractionBounded,
        ])
    }
    /// Index of the first field where the whole window matches
    pub fn find(&self, values: &[FieldValue]) -> Option<usize> {
        if self.0.is_empty() {
            return None;
        }
        values.windows(self.0.len()).position(|window| {
            window
                .iter()
                .zip(&self.0)
                .all(|(value, predicate)| predicate.matches(value))
        })
    }
}

/// Index of the first field of the location block
pub fn probe_location_block(record: &Record) -> Result<usize> {
    let values: Vec<_> = record.values().collect();
    ProbeRule::location_block()
        .find(&values)
        .ok_or(SchemaError::LocationBlock)
}

/// Index of the first field whose string form contains `job_id`
pub fn find_micrograph_field(record: &Record, job_id: &str) -> Result<usize> {
    record
        .values()
        .position(|value| value.to_string().contains(job_id))
        .ok_or_else(|| SchemaError::MicrographField(job_id.to_string()))
}

/// Indices of the record fields the picking pipeline reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    micrograph_name: usize,
    location: usize,
    particle_id: usize,
    blob_shape: usize,
    image_shape: usize,
}
impl FieldLayout {
    /// Infers the layout from the first record of a batch
    ///
    /// The micrograph name field is the first one containing `job_id`; without a job
    /// identifier the micrograph path of the location block is used.
    pub fn probe(records: &[Record], job_id: Option<&str>) -> Result<Self> {
        let first = records.first().ok_or(SchemaError::EmptyBatch)?;
        let location = probe_location_block(first)?;
        let micrograph_name = match job_id {
            Some(job_id) => find_micrograph_field(first, job_id)?,
            None => location,
        };
        let values: Vec<_> = first.values().collect();
        let particle_id = values
            .iter()
            .position(|value| FieldPredicate::Integer.matches(value))
            .ok_or(SchemaError::ParticleId)?;
        let arrays: Vec<_> = values
            .iter()
            .enumerate()
            .filter(|(_, value)| value.as_array().is_some())
            .map(|(i, _)| i)
            .take(2)
            .collect();
        let (blob_shape, image_shape) = match arrays.as_slice() {
            [blob, image] => (*blob, *image),
            _ => return Err(SchemaError::ArrayFields(arrays.len())),
        };
        let layout = Self {
            micrograph_name,
            location,
            particle_id,
            blob_shape,
            image_shape,
        };
        log::debug!("{:?}", layout);
        Ok(layout)
    }
    /// Field holding the micrograph name
    pub fn micrograph_name(&self) -> usize {
        self.micrograph_name
    }
    /// Micrograph path of the location block
    pub fn micrograph_path(&self) -> usize {
        self.location
    }
    /// Micrograph `[height, width]` of the location block
    pub fn micrograph_shape(&self) -> usize {
        self.location + 1
    }
    pub fn center_x_frac(&self) -> usize {
        self.location + 2
    }
    pub fn center_y_frac(&self) -> usize {
        self.location + 3
    }
    pub fn particle_id(&self) -> usize {
        self.particle_id
    }
    /// First array field: the particle box shape
    pub fn blob_shape(&self) -> usize {
        self.blob_shape
    }
    /// Second array field: the micrograph `[height, width]`
    pub fn image_shape(&self) -> usize {
        self.image_shape
    }
}
