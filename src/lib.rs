//! Vesicle based particle picking for cryoSPARC
//!
//! Vesicles annotated by three boundary clicks in cryoSPARC are turned into a
//! [VesicleModel]; particles are then picked procedurally on rings around every
//! vesicle and written back as cryoSPARC particle records, using an existing pick file
//! as the template for all the fields the picker does not set.
//!
//! cryoSPARC `.cs` files are numpy structured arrays with an undocumented field order,
//! the fields the pipeline needs are located by probing the records ([FieldLayout]).

pub mod error;
pub mod geometry;
pub mod micrograph;
pub mod params;
pub mod persist;
pub mod picker;
pub mod record;
pub mod report;
pub mod schema;
pub mod synthesizer;
pub mod vesicle;

#[cfg(test)]
mod fixtures;

pub use error::{Error, Result};
pub use params::Params;
pub use picker::{pick_model, MicrographPicks, Pick, PickerConfig, Topology};
pub use record::{FieldValue, Record, RecordArray};
pub use report::DiameterHistogram;
pub use schema::FieldLayout;
pub use synthesizer::{synthesize, ParticleVesicleMap, Synthesis};
pub use vesicle::{build_model, Vesicle, VesicleModel};

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn clicks_to_picks() {
        let side = fixtures::MICROGRAPH_SIDE as f64;
        let mcg = "J3/motioncorrected/0123_foil.mrc";
        let clicks: Vec<_> = [(1120., 1160.), (840., 1120.), (880., 840.)]
            .into_iter()
            .map(|(x, y)| (mcg, (x / side, y / side)))
            .collect();
        let clicks = fixtures::particle_array(&clicks);
        let layout = FieldLayout::probe(&clicks, Some("J3")).unwrap();
        let build = build_model(&clicks, &layout).unwrap();
        assert!(build.skipped.is_empty());
        let vesicle = build.model["0123_foil.mrc"][&0];
        assert_eq!(vesicle.center(), [1000., 1000.]);
        assert_eq!(vesicle.radius(), 200.);

        let mut json = vec![];
        serde_json::to_writer(&mut json, &build.model).unwrap();
        let model = VesicleModel::from_reader(json.as_slice()).unwrap();
        assert_eq!(model, build.model);

        let config = PickerConfig::new(100).overlap_target(0.3);
        let micrographs = pick_model(&model, &config).unwrap();
        let picks = &micrographs[0].picks;
        assert!(picks.len() >= 4);
        assert!(picks.iter().all(|pick| pick.topology == Topology::External));
        let alpha = 2. * PI / picks.len() as f64;
        assert!((picks[1].angle - alpha).abs() < 1e-12);

        let template = fixtures::particle_array(&[(mcg, (0.5, 0.5))]);
        let synthesis = synthesize(&template, &micrographs, 100).unwrap();
        assert_eq!(synthesis.records.len(), picks.len());
        assert_eq!(synthesis.particles.len(), picks.len());

        let mut cs = vec![];
        synthesis.records.to_writer(&mut cs).unwrap();
        let records = RecordArray::from_reader(cs.as_slice()).unwrap();
        assert_eq!(records.len(), picks.len());
        for (record, pick) in records.iter().zip(picks) {
            assert_eq!(record.field(0).unwrap(), FieldValue::UInt(pick.particle_id));
            assert_eq!(
                record.field(3).unwrap(),
                FieldValue::Array(vec![FieldValue::UInt(100), FieldValue::UInt(100)])
            );
            let x_frac = record.field(11).unwrap().as_f64().unwrap();
            assert!((x_frac * side - pick.x).abs() < 1e-3);
            assert_eq!(record.field(9).unwrap().as_text(), Some(mcg));
        }
    }
}
