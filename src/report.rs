//! Vesicle size distribution

use itertools::{Itertools, MinMaxResult};
use serde::Serialize;
use std::{io::Write, path::Path};

use crate::{persist, vesicle::VesicleModel};

/// Number of bins of the diameter distribution
pub const N_BIN: usize = 30;

#[derive(thiserror::Error, Debug)]
pub enum ReportError {
    #[error("failed to write the distribution")]
    Io(#[from] std::io::Error),
    #[error("failed to write the distribution CSV")]
    Csv(#[from] csv::Error),
}
type Result<T> = std::result::Result<T, ReportError>;

/// Vesicle diameters in nanometers, `pixel_size` in Angstrom
pub fn vesicle_diameters_nm(model: &VesicleModel, pixel_size: f64) -> Vec<f64> {
    model
        .vesicles()
        .map(|(_, _, vesicle)| 2. * pixel_size * vesicle.radius() / 10.)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bin {
    #[serde(rename = "diameter_min_nm")]
    pub lower: f64,
    #[serde(rename = "diameter_max_nm")]
    pub upper: f64,
    pub count: usize,
}

/// Histogram of equal width bins spanning the data range
///
/// The last bin includes its upper edge. A single valued sample is centered in a bin
/// range of width 1.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiameterHistogram(Vec<Bin>);
impl DiameterHistogram {
    pub fn new(data: &[f64], n_bin: usize) -> Self {
        let (min, max) = match data.iter().copied().filter(|x| x.is_finite()).minmax() {
            MinMaxResult::NoElements => return Self::default(),
            MinMaxResult::OneElement(x) => (x - 0.5, x + 0.5),
            MinMaxResult::MinMax(min, max) if min == max => (min - 0.5, max + 0.5),
            MinMaxResult::MinMax(min, max) => (min, max),
        };
        let n_bin = n_bin.max(1);
        let width = (max - min) / n_bin as f64;
        let mut bins: Vec<_> = (0..n_bin)
            .map(|i| Bin {
                lower: min + i as f64 * width,
                upper: min + (i + 1) as f64 * width,
                count: 0,
            })
            .collect();
        for x in data.iter().filter(|x| x.is_finite()) {
            let i = (((x - min) / width).floor() as usize).min(n_bin - 1);
            bins[i].count += 1;
        }
        Self(bins)
    }
    pub fn bins(&self) -> &[Bin] {
        &self.0
    }
    /// Number of samples in the histogram
    pub fn total(&self) -> usize {
        self.0.iter().map(|bin| bin.count).sum()
    }
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        for bin in &self.0 {
            wtr.serialize(bin)?;
        }
        wtr.flush()?;
        Ok(())
    }
    /// Writes the histogram CSV to `path`
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        persist::write_atomic(path, |writer| self.to_writer(writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{geometry::Circle, vesicle::Vesicle};

    #[test]
    fn diameters() {
        let model: VesicleModel = vec![
            (
                "a.mrc".to_string(),
                0,
                Vesicle::new(Circle { center: [0, 0], radius: 100 }, (4096, 4096), 64),
            ),
            (
                "a.mrc".to_string(),
                1,
                Vesicle::new(Circle { center: [0, 0], radius: 50 }, (4096, 4096), 64),
            ),
        ]
        .into_iter()
        .collect();
        assert_eq!(vesicle_diameters_nm(&model, 1.5), vec![30., 15.]);
    }

    #[test]
    fn histogram() {
        let data: Vec<f64> = (0..=30).map(|x| x as f64).collect();
        let histogram = DiameterHistogram::new(&data, N_BIN);
        assert_eq!(histogram.bins().len(), N_BIN);
        assert_eq!(histogram.total(), 31);
        assert_eq!(histogram.bins()[0].count, 1);
        assert_eq!(histogram.bins()[29].count, 2);
        assert_eq!(histogram.bins()[29].upper, 30.);
    }

    #[test]
    fn degenerate_histograms() {
        assert!(DiameterHistogram::new(&[], N_BIN).bins().is_empty());
        let histogram = DiameterHistogram::new(&[40., 40.], 2);
        assert_eq!(
            histogram.bins(),
            &[
                Bin { lower: 39.5, upper: 40., count: 0 },
                Bin { lower: 40., upper: 40.5, count: 2 }
            ]
        );
    }

    #[test]
    fn csv() {
        let histogram = DiameterHistogram::new(&[1., 3.], 2);
        let mut buffer = vec![];
        histogram.to_writer(&mut buffer).unwrap();
        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "diameter_min_nm,diameter_max_nm,count\n1.0,2.0,1\n2.0,3.0,1\n"
        );
    }
}
