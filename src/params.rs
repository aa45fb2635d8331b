//! Picking parameters file
//!
//! One `label,value` line per parameter, in a fixed order; labels are only there for the
//! reader and are not checked:
//!
//! ```text
//! Vesicle model,./Vesicle_data/vesicle_model_merged.json
//! Template cs,J40_picked_particles.cs
//! Box size (px),128
//! Pixel size (A/px),1.06
//! Additional distance (A),20
//! Box overlap,0.3
//! Internal picking (Y/N),N
//! ```
//!
//! Blank lines are skipped, so the `n`-th non blank line holds the `n`-th parameter.

use itertools::Itertools;
use std::{
    fmt,
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
    str::FromStr,
};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

use crate::picker::PickerConfig;

/// Parameters in file order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum Param {
    #[strum(to_string = "vesicle model")]
    Model,
    #[strum(to_string = "template cs")]
    Template,
    #[strum(to_string = "box size (px)")]
    BoxSize,
    #[strum(to_string = "pixel size (A/px)")]
    PixelSize,
    #[strum(to_string = "additional distance (A)")]
    AdditionalDistance,
    #[strum(to_string = "box overlap")]
    Overlap,
    #[strum(to_string = "internal picking")]
    Internal,
}

/// A parameter that failed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ParamViolation {
    pub param: Param,
    pub reason: String,
}
impl fmt::Display for ParamViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line {} ({}): {}",
            self.param as usize + 1,
            self.param,
            self.reason
        )
    }
}

fn report(violations: &[ParamViolation]) -> String {
    violations.iter().join("\n")
}

#[derive(thiserror::Error, Debug)]
pub enum ParamsError {
    #[error("failed to open {1}")]
    ReadFile(#[source] io::Error, String),
    #[error("failed to read the parameters")]
    Csv(#[from] csv::Error),
    #[error("invalid parameters, fix the parameters file and try again:\n{}", report(.0))]
    Invalid(Vec<ParamViolation>),
}
type Result<T> = std::result::Result<T, ParamsError>;

/// Picking parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Params {
    pub model: PathBuf,
    pub template: PathBuf,
    /// Box size in pixels
    pub box_size: u32,
    /// Pixel size in Angstrom
    pub pixel_size: f64,
    /// Distance from the vesicle boundary in Angstrom
    pub additional_distance: f64,
    pub overlap: f64,
    pub internal: bool,
}

struct Slots {
    values: Vec<Option<String>>,
    violations: Vec<ParamViolation>,
}
impl Slots {
    fn violation(&mut self, param: Param, reason: impl Into<String>) {
        self.violations.push(ParamViolation {
            param,
            reason: reason.into(),
        });
    }
    /// Non blank value of `param`
    fn text(&mut self, param: Param) -> Option<String> {
        match self.values.get(param as usize).cloned() {
            None => {
                self.violation(param, "missing line");
                None
            }
            Some(None) => {
                self.violation(param, "no value");
                None
            }
            Some(Some(value)) if value.is_empty() => {
                self.violation(param, "value is blank");
                None
            }
            Some(Some(value)) => Some(value),
        }
    }
    fn number<T: FromStr>(&mut self, param: Param, kind: &str) -> Option<T> {
        let text = self.text(param)?;
        match text.parse::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                self.violation(param, format!("{:?} is not {}", text, kind));
                None
            }
        }
    }
    fn check<T>(
        &mut self,
        param: Param,
        value: Option<T>,
        valid: impl Fn(&T) -> bool,
        reason: &str,
    ) -> Option<T> {
        let value = value?;
        if valid(&value) {
            Some(value)
        } else {
            self.violation(param, reason);
            None
        }
    }
}

impl Params {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        log::info!("Loading {:?}...", path);
        let file =
            File::open(path).map_err(|e| ParamsError::ReadFile(e, path.display().to_string()))?;
        Self::from_reader(file)
    }
    /// Parses and validates the parameters, all violations are reported at once
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut values = vec![];
        for result in rdr.records() {
            let record = result?;
            values.push(record.get(1).map(|value| value.to_string()));
        }
        for (param, value) in Param::iter().zip(&values) {
            log::debug!("{}: {:?}", param, value);
        }
        let mut slots = Slots {
            values,
            violations: vec![],
        };

        let model = slots.text(Param::Model);
        let template = slots.text(Param::Template);
        let box_size = slots.number::<i64>(Param::BoxSize, "an integer");
        let box_size = slots
            .check(Param::BoxSize, box_size, |v| *v > 0, "must be a positive value")
            .and_then(|v| match u32::try_from(v) {
                Ok(v) => Some(v),
                Err(_) => {
                    slots.violation(Param::BoxSize, "is too large");
                    None
                }
            });
        let pixel_size = slots.number::<f64>(Param::PixelSize, "a number");
        let pixel_size = slots.check(
            Param::PixelSize,
            pixel_size,
            |v| v.is_finite() && *v > 0.,
            "must be a positive value",
        );
        let additional_distance = slots.number::<f64>(Param::AdditionalDistance, "a number");
        let additional_distance = slots.check(
            Param::AdditionalDistance,
            additional_distance,
            |v| v.is_finite(),
            "must be finite",
        );
        let overlap = slots.number::<f64>(Param::Overlap, "a number");
        let overlap = slots.check(
            Param::Overlap,
            overlap,
            |v| (0. ..=1.).contains(v),
            "must be between 0 and 1",
        );
        let internal = slots
            .values
            .get(Param::Internal as usize)
            .cloned()
            .flatten()
            .is_some_and(|flag| flag == "Y" || flag == "y");

        match (
            model,
            template,
            box_size,
            pixel_size,
            additional_distance,
            overlap,
        ) {
            (
                Some(model),
                Some(template),
                Some(box_size),
                Some(pixel_size),
                Some(additional_distance),
                Some(overlap),
            ) if slots.violations.is_empty() => Ok(Self {
                model: model.into(),
                template: template.into(),
                box_size,
                pixel_size,
                additional_distance,
                overlap,
                internal,
            }),
            _ => {
                for violation in &slots.violations {
                    log::error!("{}", violation);
                }
                Err(ParamsError::Invalid(slots.violations))
            }
        }
    }
    /// Picker settings with the distances converted to pixels
    pub fn picker_config(&self) -> PickerConfig {
        PickerConfig::new(self.box_size)
            .additional_distance(self.additional_distance / self.pixel_size)
            .overlap_target(self.overlap)
            .internal(self.internal)
    }
}
