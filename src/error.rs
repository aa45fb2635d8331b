use crate::{
    geometry::GeometryError, params::ParamsError, picker::PickerError, record::RecordError,
    report::ReportError, schema::SchemaError, synthesizer::SynthesisError,
    vesicle::VesicleError,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error in the `record` module")]
    Record(#[from] RecordError),
    #[error("Error in the `schema` module")]
    Schema(#[from] SchemaError),
    #[error("Error in the `geometry` module")]
    Geometry(#[from] GeometryError),
    #[error("Error in the `vesicle` module")]
    Vesicle(#[from] VesicleError),
    #[error("Error in the `picker` module")]
    Picker(#[from] PickerError),
    #[error("Error in the `synthesizer` module")]
    Synthesis(#[from] SynthesisError),
    #[error("Error in the `params` module")]
    Params(#[from] ParamsError),
    #[error("Error in the `report` module")]
    Report(#[from] ReportError),
}
pub type Result<T> = std::result::Result<T, Error>;
