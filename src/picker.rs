//! Procedural particle picking around vesicles
//!
//! Picks are placed on a ring of radius `r_eff = radius + additional distance` around
//! each vesicle center. The number of picks on the ring, the divisor, grows from 3 until
//! the boxes of two neighboring picks overlap at least as much as the target. Picks
//! whose box leaves the micrograph are dropped. With internal picking enabled, rings of
//! shrinking radius are added inside the vesicle.

use indicatif::{ParallelProgressIterator, ProgressBar};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, f64::consts::PI};
use strum_macros::{Display, EnumString};

use crate::vesicle::{Vesicle, VesicleModel};

/// Synthetic particle ids start here, above any id issued by cryoSPARC
pub const PARTICLE_ID_BASE: u64 = 9_000_000_000_000_000_000;
/// Smallest number of picks on a ring
pub const MIN_DIVISOR: usize = 3;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PickerError {
    #[error("box size must be positive")]
    BoxSize,
    #[error("overlap target {0} is outside [0, 1]")]
    OverlapTarget(f64),
}
type Result<T> = std::result::Result<T, PickerError>;

/// Position of a pick relative to the vesicle boundary
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// On the boundary ring
    External,
    /// On a ring inside the vesicle
    Internal,
}

/// Picker settings, lengths in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PickerConfig {
    box_size: u32,
    additional_distance: f64,
    overlap_target: f64,
    internal: bool,
}
impl Default for PickerConfig {
    fn default() -> Self {
        Self {
            box_size: 128,
            additional_distance: 0.,
            overlap_target: 0.3,
            internal: false,
        }
    }
}
impl PickerConfig {
    pub fn new(box_size: u32) -> Self {
        Self {
            box_size,
            ..Default::default()
        }
    }
    /// Distance added to the vesicle radius
    pub fn additional_distance(self, additional_distance: f64) -> Self {
        Self {
            additional_distance,
            ..self
        }
    }
    /// Overlap of neighboring boxes to reach, in `[0, 1]`
    pub fn overlap_target(self, overlap_target: f64) -> Self {
        Self {
            overlap_target,
            ..self
        }
    }
    /// Enables the rings inside the vesicles
    pub fn internal(self, internal: bool) -> Self {
        Self { internal, ..self }
    }
    pub fn box_size(&self) -> u32 {
        self.box_size
    }
    pub fn validate(&self) -> Result<()> {
        if self.box_size == 0 {
            return Err(PickerError::BoxSize);
        }
        if !(0. ..=1.).contains(&self.overlap_target) {
            return Err(PickerError::OverlapTarget(self.overlap_target));
        }
        Ok(())
    }
    /// Radius decrement between consecutive rings
    fn shrink(&self) -> f64 {
        self.box_size as f64 * (1. - self.overlap_target)
    }
}

/// A particle pick
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Pick {
    /// Position in pixels
    pub x: f64,
    pub y: f64,
    /// Synthetic id, 0 until [assign_particle_ids]
    pub particle_id: u64,
    /// Index of the vesicle in its micrograph
    pub vesicle: usize,
    /// Placement angle in radians
    pub angle: f64,
    /// Radius of the ring the pick is on
    pub r_eff: f64,
    pub topology: Topology,
}

/// Picks of one micrograph
#[derive(Debug, Clone, PartialEq)]
pub struct MicrographPicks {
    pub micrograph: String,
    /// Micrograph `(height, width)` in pixels
    pub shape: (u32, u32),
    pub picks: Vec<Pick>,
}

/// Overlap of two square boxes of side `box_size` centered on `a` and `b`
///
/// Centers are truncated to whole pixels. The overlap is
/// `(2 A - (box_size + dx) (box_size + dy)) / A` with `A` the box area and `dx`, `dy`
/// the center offsets; it is 0 when the boxes are apart along either axis and never
/// negative.
pub fn box_overlap(a: [f64; 2], b: [f64; 2], box_size: f64) -> f64 {
    let dx = (a[0].trunc() - b[0].trunc()).abs();
    let dy = (a[1].trunc() - b[1].trunc()).abs();
    if dx >= box_size || dy >= box_size {
        return 0.;
    }
    let area = box_size * box_size;
    ((2. * area - (box_size + dx) * (box_size + dy)) / area).max(0.)
}

/// Position on the ring of radius `r_eff` about `center` at `angle`, counterclockwise in
/// image coordinates
pub fn ring_position(center: [f64; 2], r_eff: f64, angle: f64) -> [f64; 2] {
    [center[0] + r_eff * angle.cos(), center[1] - r_eff * angle.sin()]
}

/// Largest divisor tried on a ring: neighbors at least one pixel apart along the arc
pub fn max_divisor(r_eff: f64) -> usize {
    let arc = (2. * PI * r_eff).ceil();
    if arc.is_finite() && arc > MIN_DIVISOR as f64 {
        arc as usize
    } else {
        MIN_DIVISOR
    }
}

/// Smallest divisor giving neighbors an overlap of at least `target`, and that overlap
///
/// The search stops at [max_divisor] if the target is never reached.
pub fn settle_divisor(center: [f64; 2], r_eff: f64, box_size: f64, target: f64) -> (usize, f64) {
    let first = ring_position(center, r_eff, 0.);
    let limit = max_divisor(r_eff);
    let mut div = MIN_DIVISOR;
    loop {
        let second = ring_position(center, r_eff, 2. * PI / div as f64);
        let overlap = box_overlap(first, second, box_size);
        if overlap >= target || div >= limit {
            return (div, overlap);
        }
        div += 1;
    }
}

/// Checks that the box of a pick at `(x, y)` stays in `(0, width - box) x (0, height - box)`
pub fn in_bounds(x: f64, y: f64, (height, width): (u32, u32), box_size: u32) -> bool {
    let max_x = width as f64 - box_size as f64;
    let max_y = height as f64 - box_size as f64;
    x > 0. && x < max_x && y > 0. && y < max_y
}

/// Picks around one vesicle, ring by ring
///
/// Every ring after the first is [Topology::Internal]. A new ring is added only if the
/// previous one needed more than [MIN_DIVISOR] picks; its radius is smaller by
/// `box_size (1 - overlap_target)` and must stay at least half a box.
pub fn pick_vesicle(index: usize, vesicle: &Vesicle, config: &PickerConfig) -> Vec<Pick> {
    let center = vesicle.center();
    let box_size = config.box_size as f64;
    let shrink = config.shrink();
    let mut radius = vesicle.radius();
    let mut topology = Topology::External;
    let mut picks = vec![];
    loop {
        let r_eff = radius + config.additional_distance;
        let (div, overlap) = settle_divisor(center, r_eff, box_size, config.overlap_target);
        log::debug!(
            "vesicle #{}: {} ring of radius {} with {} picks, overlap {:.3}",
            index,
            topology,
            r_eff,
            div,
            overlap
        );
        let alpha = 2. * PI / div as f64;
        picks.extend(
            (0..div)
                .map(|i| {
                    let angle = i as f64 * alpha;
                    let [x, y] = ring_position(center, r_eff, angle);
                    Pick {
                        x,
                        y,
                        particle_id: 0,
                        vesicle: index,
                        angle,
                        r_eff,
                        topology,
                    }
                })
                .filter(|pick| {
                    in_bounds(
                        pick.x,
                        pick.y,
                        vesicle.micrograph_shape(),
                        config.box_size,
                    )
                }),
        );
        if !config.internal || div <= MIN_DIVISOR || !(shrink > 0.) {
            break;
        }
        radius -= shrink;
        if radius + config.additional_distance < box_size / 2. {
            break;
        }
        topology = Topology::Internal;
    }
    picks
}

/// Picks of all the vesicles of one micrograph, in vesicle index order
pub fn pick_micrograph(
    micrograph: &str,
    vesicles: &BTreeMap<usize, Vesicle>,
    config: &PickerConfig,
) -> MicrographPicks {
    let shape = vesicles
        .values()
        .next()
        .map(|vesicle| vesicle.micrograph_shape())
        .unwrap_or_default();
    MicrographPicks {
        micrograph: micrograph.to_string(),
        shape,
        picks: vesicles
            .iter()
            .flat_map(|(index, vesicle)| pick_vesicle(*index, vesicle, config))
            .collect(),
    }
}

/// Numbers the picks from [PARTICLE_ID_BASE] in order, returns the number of picks
pub fn assign_particle_ids(micrographs: &mut [MicrographPicks]) -> usize {
    let picks = micrographs
        .iter_mut()
        .flat_map(|micrograph| micrograph.picks.iter_mut());
    let mut n_pick = 0;
    for (offset, pick) in picks.enumerate() {
        pick.particle_id = PARTICLE_ID_BASE + offset as u64;
        n_pick += 1;
    }
    n_pick
}

/// Picks every vesicle of the model
///
/// Micrographs are processed in parallel; the output and the particle ids follow the
/// model order.
pub fn pick_model(model: &VesicleModel, config: &PickerConfig) -> Result<Vec<MicrographPicks>> {
    pick_model_with_progress(model, config, ProgressBar::hidden())
}

/// [pick_model] reporting one tick per micrograph on `progress`
pub fn pick_model_with_progress(
    model: &VesicleModel,
    config: &PickerConfig,
    progress: ProgressBar,
) -> Result<Vec<MicrographPicks>> {
    config.validate()?;
    progress.set_length(model.len() as u64);
    let mut micrographs: Vec<_> = model
        .par_iter()
        .progress_with(progress.clone())
        .map(|(micrograph, vesicles)| pick_micrograph(micrograph, vesicles, config))
        .collect();
    progress.finish();
    let n_pick = assign_particle_ids(&mut micrographs);
    log::info!(
        "{} picks over {} vesicles in {} micrographs",
        n_pick,
        model.n_vesicle(),
        micrographs.len()
    );
    Ok(micrographs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Circle;

    fn vesicle(center: [i64; 2], radius: i64, box_size: u32) -> Vesicle {
        Vesicle::new(Circle { center, radius }, (4096, 4096), box_size)
    }

    #[test]
    fn overlap() {
        assert_eq!(box_overlap([10., 10.], [10., 10.], 100.), 1.);
        assert_eq!(box_overlap([10., 10.], [110., 10.], 100.), 0.);
        assert_eq!(box_overlap([10., 10.], [10.9, 10.9], 100.), 1.);
        assert!((box_overlap([0., 0.], [20., 0.], 100.) - 0.8).abs() < 1e-12);
        assert_eq!(box_overlap([0., 0.], [60., 60.], 100.), 0.);
    }

    #[test]
    fn overlap_grows_with_the_divisor() {
        for &(radius, box_size) in &[(20., 16.), (200., 100.), (350., 64.), (1200., 256.)] {
            for &center in &[[1000., 1000.], [37., 2011.]] {
                let first = ring_position(center, radius, 0.);
                let overlaps: Vec<_> = (MIN_DIVISOR..400)
                    .map(|div| {
                        let second = ring_position(center, radius, 2. * PI / div as f64);
                        box_overlap(first, second, box_size)
                    })
                    .collect();
                for (div, pair) in overlaps.windows(2).enumerate() {
                    assert!(
                        pair[1] >= pair[0],
                        "radius {}, box {}: divisor {} gives {} then {}",
                        radius,
                        box_size,
                        div + MIN_DIVISOR,
                        pair[0],
                        pair[1]
                    );
                }
            }
        }
    }

    #[test]
    fn divisor_is_bounded() {
        let (div, overlap) = settle_divisor([1000., 1000.], 5., 100., 1.);
        assert_eq!(div, max_divisor(5.));
        assert!(overlap < 1.);
        assert_eq!(max_divisor(-3.), MIN_DIVISOR);
        assert_eq!(settle_divisor([0., 0.], 1000., 10., 0.).0, MIN_DIVISOR);
    }

    #[test]
    fn bounds() {
        let shape = (4096, 4096);
        assert!(in_bounds(1., 1., shape, 100));
        assert!(!in_bounds(0., 10., shape, 100));
        assert!(!in_bounds(3996., 10., shape, 100));
        assert!(in_bounds(3995.9, 3995.9, shape, 100));
        assert!(!in_bounds(10., -2., shape, 100));
    }

    #[test]
    fn non_square_bounds() {
        let shape = (4096, 5760);
        assert!(in_bounds(5000., 100., shape, 100));
        assert!(!in_bounds(100., 5000., shape, 100));
        assert!(in_bounds(5659., 3995., shape, 100));
        assert!(!in_bounds(5660., 100., shape, 100));
        assert!(!in_bounds(100., 3996., shape, 100));
    }

    #[test]
    fn picks_on_a_wide_micrograph() {
        let config = PickerConfig::new(100).overlap_target(0.3);
        let wide = Vesicle::new(
            Circle {
                center: [5000, 2000],
                radius: 300,
            },
            (4096, 5760),
            100,
        );
        let picks = pick_vesicle(0, &wide, &config);
        assert!(!picks.is_empty());
        assert!(picks.iter().all(|pick| pick.x > 4096.));
        let narrow = Vesicle::new(
            Circle {
                center: [2000, 5000],
                radius: 300,
            },
            (4096, 5760),
            100,
        );
        assert!(pick_vesicle(0, &narrow, &config).is_empty());
    }

    #[test]
    fn picks_stay_in_the_micrograph() {
        let config = PickerConfig::new(100).overlap_target(0.5).internal(true);
        for v in [
            vesicle([50, 50], 300, 100),
            vesicle([4000, 2000], 400, 100),
            vesicle([2000, 4090], 250, 100),
        ] {
            for pick in pick_vesicle(0, &v, &config) {
                assert!(pick.x > 0. && pick.x < 3996., "{:?}", pick);
                assert!(pick.y > 0. && pick.y < 3996., "{:?}", pick);
            }
        }
    }

    #[test]
    fn single_vesicle() {
        let config = PickerConfig::new(100).overlap_target(0.3);
        let picks = pick_vesicle(0, &vesicle([1000, 1000], 200, 100), &config);
        assert!(picks.len() >= 4);
        let alpha = 2. * PI / picks.len() as f64;
        for (i, pick) in picks.iter().enumerate() {
            assert_eq!(pick.topology, Topology::External);
            assert_eq!(pick.r_eff, 200.);
            assert!((pick.angle - i as f64 * alpha).abs() < 1e-12);
            let r = ((pick.x - 1000.).powi(2) + (pick.y - 1000.).powi(2)).sqrt();
            assert!((r - 200.).abs() < 1e-9);
            assert!(in_bounds(pick.x, pick.y, (4096, 4096), 100));
        }
        let first = [picks[0].x, picks[0].y];
        assert!(box_overlap(first, [picks[1].x, picks[1].y], 100.) >= 0.3);
    }

    #[test]
    fn internal_rings() {
        let config = PickerConfig::new(100)
            .overlap_target(0.3)
            .additional_distance(20.)
            .internal(true);
        let picks = pick_vesicle(3, &vesicle([2000, 2000], 400, 100), &config);
        let external: Vec<_> = picks
            .iter()
            .filter(|pick| pick.topology == Topology::External)
            .collect();
        assert!(!external.is_empty());
        assert!(external.iter().all(|pick| pick.r_eff == 420.));
        let internal: Vec<_> = picks
            .iter()
            .filter(|pick| pick.topology == Topology::Internal)
            .collect();
        assert!(!internal.is_empty());
        assert!(internal.iter().all(|pick| pick.r_eff < 420. && pick.r_eff >= 50.));
        assert!(picks.iter().all(|pick| pick.vesicle == 3));
        let mut radii: Vec<_> = picks.iter().map(|pick| pick.r_eff).collect();
        radii.dedup();
        assert!(radii.windows(2).all(|pair| pair[1] < pair[0]));
    }

    #[test]
    fn full_overlap_target_terminates() {
        let config = PickerConfig::new(100).overlap_target(1.).internal(true);
        let picks = pick_vesicle(0, &vesicle([2000, 2000], 300, 100), &config);
        assert!(picks
            .iter()
            .all(|pick| pick.topology == Topology::External));
    }

    #[test]
    fn particle_ids() {
        let model: VesicleModel = vec![
            ("b.mrc".to_string(), 0, vesicle([1000, 1000], 200, 100)),
            ("a.mrc".to_string(), 1, vesicle([2000, 2000], 200, 100)),
            ("a.mrc".to_string(), 0, vesicle([3000, 3000], 200, 100)),
        ]
        .into_iter()
        .collect();
        let config = PickerConfig::new(100).overlap_target(0.3);
        let micrographs = pick_model(&model, &config).unwrap();
        assert_eq!(micrographs[0].micrograph, "a.mrc");
        assert_eq!(micrographs[0].picks[0].vesicle, 0);
        assert_eq!(micrographs[0].shape, (4096, 4096));
        let ids: Vec<_> = micrographs
            .iter()
            .flat_map(|micrograph| micrograph.picks.iter().map(|pick| pick.particle_id))
            .collect();
        let expected: Vec<_> = (0..ids.len() as u64).map(|i| PARTICLE_ID_BASE + i).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn progress_counts_micrographs() {
        let model: VesicleModel = vec![
            ("a.mrc".to_string(), 0, vesicle([1000, 1000], 200, 100)),
            ("b.mrc".to_string(), 0, vesicle([2000, 2000], 200, 100)),
            ("c.mrc".to_string(), 0, vesicle([3000, 3000], 200, 100)),
        ]
        .into_iter()
        .collect();
        let config = PickerConfig::new(100).overlap_target(0.3);
        let progress = ProgressBar::hidden();
        let micrographs = pick_model_with_progress(&model, &config, progress.clone()).unwrap();
        assert_eq!(progress.length(), Some(3));
        assert_eq!(progress.position(), 3);
        assert!(progress.is_finished());
        assert_eq!(micrographs, pick_model(&model, &config).unwrap());
    }

    #[test]
    fn invalid_config() {
        let model = VesicleModel::default();
        assert_eq!(
            pick_model(&model, &PickerConfig::new(0)),
            Err(PickerError::BoxSize)
        );
        assert_eq!(
            pick_model(&model, &PickerConfig::new(10).overlap_target(1.5)),
            Err(PickerError::OverlapTarget(1.5))
        );
    }

    #[test]
    fn topology_names() {
        assert_eq!(Topology::Internal.to_string(), "internal");
        assert_eq!("external".parse::<Topology>().unwrap(), Topology::External);
        assert_eq!(
            serde_json::to_string(&Topology::External).unwrap(),
            "\"external\""
        );
    }
}
