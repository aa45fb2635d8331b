use anyhow::Context;
use glob::glob;
use std::{path::Path, process};
use structopt::{clap::AppSettings, StructOpt};
use vesicle_picker::VesicleModel;

const MERGED: &str = "vesicle_model_merged.json";
const USAGE: &str = "usage: merge_vesicle_model";

#[derive(Debug, StructOpt)]
#[structopt(
    name = "merge_vesicle_model",
    about = "Merges the vesicle models of ./Vesicle_data into ./Vesicle_data/vesicle_model_merged.json",
    setting = AppSettings::DisableHelpFlags,
    setting = AppSettings::DisableVersion
)]
struct Opt {}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let _ = Opt::from_args_safe().unwrap_or_else(|_| {
        eprintln!("{}", USAGE);
        process::exit(1)
    });

    let mut paths = glob("Vesicle_data/*.json")?.collect::<Result<Vec<_>, _>>()?;
    paths.retain(|path| path.file_name().is_some_and(|name| name != MERGED));
    paths.sort();
    println!("Found {} vesicle models", paths.len());

    let mut merged = VesicleModel::default();
    for path in &paths {
        let model =
            VesicleModel::load(path).with_context(|| format!("failed to load {:?}", path))?;
        log::info!("{:?}: {} vesicles", path, model.n_vesicle());
        merged = merged.merge(model);
    }

    let path = Path::new("Vesicle_data").join(MERGED);
    merged
        .save(&path)
        .with_context(|| format!("failed to write {:?}", path))?;
    println!(
        "{} vesicles over {} micrographs written to {:?}",
        merged.n_vesicle(),
        merged.len(),
        path
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use structopt::clap::ErrorKind;

    #[test]
    fn positional_arguments_only() {
        assert!(Opt::from_iter_safe(["merge_vesicle_model"]).is_ok());
        assert!(Opt::from_iter_safe(["merge_vesicle_model", "a.json"]).is_err());
        for flag in ["--help", "--version"] {
            let kind = Opt::from_iter_safe(["merge_vesicle_model", flag])
                .err()
                .map(|e| e.kind);
            assert!(
                !matches!(kind, Some(ErrorKind::HelpDisplayed | ErrorKind::VersionDisplayed)),
                "{}: {:?}",
                flag,
                kind
            );
        }
    }
}
