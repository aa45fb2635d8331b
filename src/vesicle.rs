//! Vesicle model
//!
//! Vesicles are annotated in cryoSPARC by clicking three points on their boundary, in
//! order. Every three consecutive records of the pick file form one triple and the
//! circle through the triple is the vesicle. The model maps micrograph names to
//! vesicles indexed by triple number and is stored as JSON:
//!
//! ```json
//! { "0123_foil.mrc": { "0": { "center": [1000, 1000], "radius": 200,
//!                             "mcg_h": 4096, "mcg_w": 4096, "box_size": 128 } } }
//! ```

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt,
    fs::File,
    io::{self, BufReader, Read},
    ops::Deref,
    path::Path,
};

use crate::{
    geometry::{circle_from_three_points, Circle, GeometryError, Point2},
    micrograph::basename,
    persist,
    record::{FieldValue, Record, RecordError},
    schema::FieldLayout,
};

/// Version of the model JSON written by [VesicleModel::save]
pub const MODEL_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum VesicleError {
    #[error("failed to open {1}")]
    ReadFile(#[source] io::Error, String),
    #[error("failed to write the vesicle model")]
    Io(#[from] io::Error),
    #[error("invalid vesicle model JSON")]
    Json(#[from] serde_json::Error),
    #[error("vesicle model version {0} is not supported, expected at most {MODEL_VERSION}")]
    Version(u32),
    #[error("field #{index} of record #{record} is {value}, expected {expected}")]
    Field {
        record: usize,
        index: usize,
        value: String,
        expected: &'static str,
    },
    #[error("failed to decode a record field")]
    Record(#[from] RecordError),
}
type Result<T> = std::result::Result<T, VesicleError>;

/// A vesicle: circle, micrograph size and particle box size, all in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vesicle {
    center: [i64; 2],
    radius: i64,
    mcg_h: u32,
    mcg_w: u32,
    box_size: u32,
}
impl Vesicle {
    pub fn new(circle: Circle, (mcg_h, mcg_w): (u32, u32), box_size: u32) -> Self {
        Self {
            center: circle.center,
            radius: circle.radius,
            mcg_h,
            mcg_w,
            box_size,
        }
    }
    pub fn center(&self) -> [f64; 2] {
        [self.center[0] as f64, self.center[1] as f64]
    }
    pub fn radius(&self) -> f64 {
        self.radius as f64
    }
    /// Micrograph `(height, width)`
    pub fn micrograph_shape(&self) -> (u32, u32) {
        (self.mcg_h, self.mcg_w)
    }
    pub fn box_size(&self) -> u32 {
        self.box_size
    }
}

type Micrographs = BTreeMap<String, BTreeMap<usize, Vesicle>>;

#[derive(Deserialize)]
struct VersionedModel {
    version: u32,
    micrographs: Micrographs,
}

/// Vesicles per micrograph name, indexed by triple number
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct VesicleModel(Micrographs);
impl Deref for VesicleModel {
    type Target = Micrographs;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl FromIterator<(String, usize, Vesicle)> for VesicleModel {
    fn from_iter<T: IntoIterator<Item = (String, usize, Vesicle)>>(iter: T) -> Self {
        let mut micrographs = Micrographs::new();
        for (micrograph, index, vesicle) in iter {
            micrographs
                .entry(micrograph)
                .or_default()
                .insert(index, vesicle);
        }
        Self(micrographs)
    }
}
impl VesicleModel {
    /// Reads a model, either the bare micrograph map or `{"version", "micrographs"}`
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_reader(reader)?;
        if value.get("version").is_some_and(|version| version.is_number()) {
            let model: VersionedModel = serde_json::from_value(value)?;
            if model.version > MODEL_VERSION {
                return Err(VesicleError::Version(model.version));
            }
            Ok(Self(model.micrographs))
        } else {
            Ok(Self(serde_json::from_value(value)?))
        }
    }
    /// Loads a model JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| VesicleError::ReadFile(e, path.display().to_string()))?;
        Self::from_reader(BufReader::new(file))
    }
    /// Writes the model JSON to `path`
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        persist::write_atomic(path, |writer| Ok(serde_json::to_writer(writer, &self.0)?))
    }
    /// Merges `other` into the model
    ///
    /// A micrograph present in both models takes the whole vesicle set of `other`.
    pub fn merge(mut self, other: VesicleModel) -> Self {
        self.0.extend(other.0);
        self
    }
    /// Iterator over `(micrograph, vesicle index, vesicle)`
    pub fn vesicles(&self) -> impl Iterator<Item = (&str, usize, &Vesicle)> + '_ {
        self.0.iter().flat_map(|(micrograph, vesicles)| {
            vesicles
                .iter()
                .map(move |(index, vesicle)| (micrograph.as_str(), *index, vesicle))
        })
    }
    pub fn n_vesicle(&self) -> usize {
        self.0.values().map(|vesicles| vesicles.len()).sum()
    }
}

/// Why a triple did not give a vesicle
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    Degenerate(GeometryError),
    MixedMicrographs(Vec<String>),
}
impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Degenerate(e) => write!(f, "{}", e),
            SkipReason::MixedMicrographs(names) => {
                write!(f, "clicks span micrographs {}", names.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedVesicle {
    pub micrograph: String,
    pub index: usize,
    pub reason: SkipReason,
}

/// A model and the triples left out of it
#[derive(Debug, Default)]
pub struct ModelBuild {
    pub model: VesicleModel,
    pub skipped: Vec<SkippedVesicle>,
}

fn field_error(
    record: usize,
    index: usize,
    value: FieldValue,
    expected: &'static str,
) -> VesicleError {
    VesicleError::Field {
        record,
        index,
        value: value.to_string(),
        expected,
    }
}
fn number(record: &Record, nth: usize, index: usize) -> Result<f64> {
    let value = record.field(index)?;
    value
        .as_f64()
        .ok_or_else(|| field_error(nth, index, value, "a number"))
}
fn pair(record: &Record, nth: usize, index: usize) -> Result<[f64; 2]> {
    let value = record.field(index)?;
    let numbers = match value.as_array() {
        Some([a, b]) => a.as_f64().zip(b.as_f64()),
        _ => None,
    };
    numbers
        .map(|(a, b)| [a, b])
        .ok_or_else(|| field_error(nth, index, value, "a pair of numbers"))
}

/// Builds the vesicle model of boundary click records
///
/// Records are grouped by three in order, a trailing incomplete triple is dropped.
/// Triples that are collinear or span several micrographs are reported in
/// [ModelBuild::skipped] rather than failing the whole batch.
pub fn build_model(records: &[Record], layout: &FieldLayout) -> Result<ModelBuild> {
    let mut build = ModelBuild::default();
    let mut vesicles = Vec::with_capacity(records.len() / 3);
    for (index, triple) in records.chunks_exact(3).enumerate() {
        let nth = 3 * index;
        let names = triple
            .iter()
            .map(|record| {
                record
                    .field(layout.micrograph_name())
                    .map(|value| basename(&value.to_string()))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if names.iter().any(|name| *name != names[0]) {
            build.skipped.push(SkippedVesicle {
                micrograph: names[0].clone(),
                index,
                reason: SkipReason::MixedMicrographs(names),
            });
            continue;
        }
        let mut points = [Point2::origin(); 3];
        for (k, (point, record)) in points.iter_mut().zip(triple).enumerate() {
            let [height, width] = pair(record, nth + k, layout.micrograph_shape())?;
            let x_frac = number(record, nth + k, layout.center_x_frac())?;
            let y_frac = number(record, nth + k, layout.center_y_frac())?;
            *point = Point2::new((width * x_frac).round(), (height * y_frac).round());
        }
        let circle = match circle_from_three_points(points[0], points[1], points[2]) {
            Ok(circle) => circle,
            Err(e) => {
                build.skipped.push(SkippedVesicle {
                    micrograph: names[0].clone(),
                    index,
                    reason: SkipReason::Degenerate(e),
                });
                continue;
            }
        };
        let last = &triple[2];
        let [box_size, _] = pair(last, nth + 2, layout.blob_shape())?;
        let [mcg_h, mcg_w] = pair(last, nth + 2, layout.image_shape())?;
        let vesicle = Vesicle::new(circle, (mcg_h as u32, mcg_w as u32), box_size as u32);
        vesicles.push((names[0].clone(), index, vesicle));
    }
    if records.len() % 3 != 0 {
        log::warn!(
            "{} trailing record(s) do not make a full triple and are ignored",
            records.len() % 3
        );
    }
    for skipped in &build.skipped {
        log::warn!(
            "vesicle #{} of {} skipped: {}",
            skipped.index,
            skipped.micrograph,
            skipped.reason
        );
    }
    build.model = vesicles.into_iter().collect();
    Ok(build)
}
