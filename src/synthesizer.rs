//! Pick records synthesis
//!
//! Every pick becomes a copy of a template record of its micrograph with the particle
//! id, the box shape and the fractional location overwritten. All the other fields
//! (job, pixel size, micrograph uid, ...) come unchanged from the template.

use serde::Serialize;
use std::{
    collections::{BTreeMap, HashMap},
    io::{self, Write},
    ops::Deref,
    path::Path,
};

use crate::{
    micrograph::MicrographKey,
    persist,
    picker::{MicrographPicks, Topology},
    record::{FieldValue, Record, RecordArray, RecordError},
    schema::{FieldLayout, SchemaError},
};

#[derive(thiserror::Error, Debug)]
pub enum SynthesisError {
    #[error("no template record for micrograph {0}")]
    TemplateLookupMiss(String),
    #[error("failed to infer the template field layout")]
    Schema(#[from] SchemaError),
    #[error("failed to write a pick into the template record")]
    Record(#[from] RecordError),
    #[error("failed to write the particle-vesicle map")]
    Io(#[from] io::Error),
    #[error("failed to serialize the particle-vesicle map")]
    Json(#[from] serde_json::Error),
}
type Result<T> = std::result::Result<T, SynthesisError>;

/// First template record of each micrograph
pub struct TemplateIndex<'a> {
    layout: FieldLayout,
    records: HashMap<MicrographKey, &'a Record>,
}
impl<'a> TemplateIndex<'a> {
    pub fn new(template: &'a RecordArray) -> Result<Self> {
        let layout = FieldLayout::probe(template, None)?;
        let mut records = HashMap::new();
        for record in template.iter() {
            let name = record.field(layout.micrograph_path())?.to_string();
            records.entry(MicrographKey::new(&name)).or_insert(record);
        }
        log::debug!("{} template micrographs", records.len());
        Ok(Self { layout, records })
    }
    pub fn layout(&self) -> &FieldLayout {
        &self.layout
    }
    pub fn get(&self, micrograph: &str) -> Result<&'a Record> {
        self.records
            .get(&MicrographKey::new(micrograph))
            .copied()
            .ok_or_else(|| SynthesisError::TemplateLookupMiss(micrograph.to_string()))
    }
}

/// Particle-vesicle map entry, `x` and `y` are micrograph fractions
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParticleEntry {
    pub x: f64,
    pub y: f64,
    pub ves_id: usize,
    pub angle: f64,
    pub r_eff: f64,
    pub topology: Topology,
}

/// Pick details per particle id
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ParticleVesicleMap(BTreeMap<u64, ParticleEntry>);
impl Deref for ParticleVesicleMap {
    type Target = BTreeMap<u64, ParticleEntry>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl ParticleVesicleMap {
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        Ok(serde_json::to_writer(writer, &self.0)?)
    }
    /// Writes the map JSON to `path`
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        persist::write_atomic(path, |writer| self.to_writer(writer))
    }
}

/// Synthesized records and the matching particle-vesicle map
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub records: RecordArray,
    pub particles: ParticleVesicleMap,
}

/// Builds one record per pick from the `template` records
///
/// Records follow the micrograph order and the pick order within each micrograph.
pub fn synthesize(
    template: &RecordArray,
    micrographs: &[MicrographPicks],
    box_size: u32,
) -> Result<Synthesis> {
    let index = TemplateIndex::new(template)?;
    let layout = *index.layout();
    let box_shape = FieldValue::Array(vec![
        FieldValue::UInt(box_size as u64),
        FieldValue::UInt(box_size as u64),
    ]);
    let mut records = RecordArray::new(template.schema().clone());
    let mut particles = BTreeMap::new();
    for micrograph in micrographs {
        if micrograph.picks.is_empty() {
            continue;
        }
        let source = index.get(&micrograph.micrograph)?;
        let (height, width) = micrograph.shape;
        for pick in &micrograph.picks {
            let (x, y) = (pick.x / width as f64, pick.y / height as f64);
            let mut record = source.clone();
            record.set(layout.particle_id(), FieldValue::UInt(pick.particle_id))?;
            record.set(layout.blob_shape(), box_shape.clone())?;
            record.set(layout.center_x_frac(), FieldValue::Float(x))?;
            record.set(layout.center_y_frac(), FieldValue::Float(y))?;
            records.push(record)?;
            particles.insert(
                pick.particle_id,
                ParticleEntry {
                    x,
                    y,
                    ves_id: pick.vesicle,
                    angle: pick.angle,
                    r_eff: pick.r_eff,
                    topology: pick.topology,
                },
            );
        }
    }
    log::info!("{} particle records synthesized", records.len());
    Ok(Synthesis {
        records,
        particles: ParticleVesicleMap(particles),
    })
}
