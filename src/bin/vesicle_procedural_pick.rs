use anyhow::Context;
use indicatif::ProgressBar;
use std::{fs, path::PathBuf, process};
use structopt::{clap::AppSettings, StructOpt};
use vesicle_picker::{
    micrograph::{basename, file_stem},
    persist::Staging,
    picker::pick_model_with_progress,
    report::{vesicle_diameters_nm, N_BIN},
    synthesize, DiameterHistogram, Params, RecordArray, VesicleModel,
};

const PARTICLE_DATA: &str = "Particle_data";
const USAGE: &str = "usage: vesicle_procedural_pick <PARAMS_CSV>";

#[derive(Debug, StructOpt)]
#[structopt(
    name = "vesicle_procedural_pick",
    about = "Picks particles around the vesicles of a vesicle model",
    setting = AppSettings::DisableHelpFlags,
    setting = AppSettings::DisableVersion
)]
struct Opt {
    /// Parameters file
    #[structopt(parse(from_os_str))]
    params: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args_safe().unwrap_or_else(|_| {
        eprintln!("{}", USAGE);
        process::exit(1)
    });

    let params = Params::from_path(&opt.params)
        .with_context(|| format!("failed to read the parameters from {:?}", opt.params))?;
    let config = params.picker_config();
    let model = VesicleModel::load(&params.model)
        .with_context(|| format!("failed to load {:?}", params.model))?;
    let template = RecordArray::load(&params.template)
        .with_context(|| format!("failed to load {:?}", params.template))?;

    println!(
        "Picking around {} vesicles in {} micrographs...",
        model.n_vesicle(),
        model.len()
    );
    let micrographs =
        pick_model_with_progress(&model, &config, ProgressBar::new(model.len() as u64))?;

    let synthesis = synthesize(&template, &micrographs, params.box_size)
        .with_context(|| format!("failed to fill in the template {:?}", params.template))?;
    let histogram = DiameterHistogram::new(
        &vesicle_diameters_nm(&model, params.pixel_size),
        N_BIN,
    );

    let stem = params.model.with_extension("");
    let name = basename(&params.model.display().to_string());
    let cs_path = format!("{}_particlesOut.cs", stem.display());
    let map_path =
        PathBuf::from(PARTICLE_DATA).join(format!("{}_particles.json", file_stem(&name)));
    let distribution_path = format!("{}_distribution.csv", stem.display());

    fs::create_dir_all(PARTICLE_DATA)
        .with_context(|| format!("failed to create {}", PARTICLE_DATA))?;
    let mut outputs = Staging::default();
    outputs
        .stage(&cs_path, |writer| synthesis.records.to_writer(writer))
        .with_context(|| format!("failed to write {}", cs_path))?;
    outputs
        .stage(&map_path, |writer| synthesis.particles.to_writer(writer))
        .with_context(|| format!("failed to write {:?}", map_path))?;
    outputs
        .stage(&distribution_path, |writer| histogram.to_writer(writer))
        .with_context(|| format!("failed to write {}", distribution_path))?;
    outputs.commit().context("failed to move the outputs in place")?;

    println!("{} particles written to {}", synthesis.records.len(), cs_path);
    log::info!("Particle-vesicle map written to {:?}", map_path);
    log::info!("Vesicle diameter distribution written to {}", distribution_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use structopt::clap::ErrorKind;

    #[test]
    fn positional_arguments_only() {
        assert!(Opt::from_iter_safe(["vesicle_procedural_pick"]).is_err());
        assert!(Opt::from_iter_safe(["vesicle_procedural_pick", "a.csv", "b.csv"]).is_err());
        for flag in ["--help", "--version", "-h", "-V"] {
            let kind = Opt::from_iter_safe(["vesicle_procedural_pick", flag])
                .err()
                .map(|e| e.kind);
            assert!(
                !matches!(kind, Some(ErrorKind::HelpDisplayed | ErrorKind::VersionDisplayed)),
                "{}: {:?}",
                flag,
                kind
            );
        }
        let opt = Opt::from_iter_safe(["vesicle_procedural_pick", "params.csv"]).unwrap();
        assert_eq!(opt.params, PathBuf::from("params.csv"));
    }
}
