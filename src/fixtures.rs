//! cryoSPARC-like particle records shared by the unit tests

use npyz::{DType, Field, TypeStr};
use std::sync::Arc;

use crate::{
    micrograph::MicrographKey,
    record::{FieldValue, Record, RecordArray, Schema},
};

pub const MICROGRAPH_SIDE: u64 = 4096;
pub const BOX_SIZE: u64 = 128;

fn plain(typestr: &str) -> DType {
    DType::Plain(typestr.parse::<TypeStr>().unwrap())
}
fn pair(typestr: &str) -> DType {
    DType::Array(2, Box::new(plain(typestr)))
}
fn field(name: &str, dtype: DType) -> Field {
    Field {
        name: name.to_string(),
        dtype,
    }
}

pub fn particle_dtype() -> DType {
    DType::Record(vec![
        field("uid", plain("<u8")),
        field("blob/path", plain("|S40")),
        field("blob/idx", plain("<u4")),
        field("blob/shape", pair("<u4")),
        field("blob/psize_A", plain("<f4")),
        field("blob/sign", plain("<f4")),
        field("blob/import_sig", plain("<u8")),
        field("location/micrograph_uid", plain("<u8")),
        field("location/exp_group_id", plain("<u4")),
        field("location/micrograph_path", plain("|S64")),
        field("location/micrograph_shape", pair("<u4")),
        field("location/center_x_frac", plain("<f4")),
        field("location/center_y_frac", plain("<f4")),
    ])
}

pub fn particle_schema() -> Arc<Schema> {
    Arc::new(Schema::from_dtype(&particle_dtype()).unwrap())
}

pub fn particle_sized(
    schema: Arc<Schema>,
    uid: u64,
    path: &str,
    (x_frac, y_frac): (f64, f64),
    (height, width): (u64, u64),
    box_size: u64,
) -> Record {
    let micrograph_uid = match MicrographKey::new(path) {
        MicrographKey::Uid(uid) => uid,
        MicrographKey::Name(_) => 0,
    };
    let pair = |a, b| FieldValue::Array(vec![FieldValue::UInt(a), FieldValue::UInt(b)]);
    Record::new(
        schema,
        vec![
            FieldValue::UInt(uid),
            FieldValue::Text("J12/extract/particles.mrc".into()),
            FieldValue::UInt(0),
            pair(box_size, box_size),
            FieldValue::Float(1.06),
            FieldValue::Float(-1.),
            FieldValue::UInt(777),
            FieldValue::UInt(micrograph_uid),
            FieldValue::UInt(1),
            FieldValue::Text(path.into()),
            pair(height, width),
            FieldValue::Float(x_frac),
            FieldValue::Float(y_frac),
        ],
    )
    .unwrap()
}

pub fn particle(schema: Arc<Schema>, uid: u64, path: &str, frac: (f64, f64)) -> Record {
    particle_sized(
        schema,
        uid,
        path,
        frac,
        (MICROGRAPH_SIDE, MICROGRAPH_SIDE),
        BOX_SIZE,
    )
}

pub fn particle_array(picks: &[(&str, (f64, f64))]) -> RecordArray {
    particle_array_sized(picks, (MICROGRAPH_SIDE, MICROGRAPH_SIDE))
}

/// Records on `(height, width)` micrographs
pub fn particle_array_sized(picks: &[(&str, (f64, f64))], shape: (u64, u64)) -> RecordArray {
    let schema = particle_schema();
    let records = picks
        .iter()
        .enumerate()
        .map(|(i, (path, frac))| {
            particle_sized(schema.clone(), 1000 + i as u64, path, *frac, shape, BOX_SIZE)
        })
        .collect();
    RecordArray::from_records(schema, records).unwrap()
}

pub fn pair_schema() -> Schema {
    Schema::from_dtype(&DType::Record(vec![
        field("a", plain("<f8")),
        field("b", plain("<i4")),
    ]))
    .unwrap()
}

pub fn pair_array() -> RecordArray {
    let schema = Arc::new(pair_schema());
    let record = Record::new(
        schema.clone(),
        vec![FieldValue::Float(0.5), FieldValue::Int(-3)],
    )
    .unwrap();
    RecordArray::from_records(schema, vec![record]).unwrap()
}
