use anyhow::Context;
use std::{fs, path::PathBuf, process};
use structopt::{clap::AppSettings, StructOpt};
use vesicle_picker::{
    build_model,
    micrograph::{basename, file_stem},
    FieldLayout, RecordArray,
};

const VESICLE_DATA: &str = "Vesicle_data";
const USAGE: &str = "usage: cs_to_vesicle_model <JOB_ID> <PARTICLES_CS>";

#[derive(Debug, StructOpt)]
#[structopt(
    name = "cs_to_vesicle_model",
    about = "Builds a vesicle model from vesicle boundary clicks",
    setting = AppSettings::DisableHelpFlags,
    setting = AppSettings::DisableVersion
)]
struct Opt {
    /// cryoSPARC job of the micrographs, e.g. J3
    job_id: String,
    /// cryoSPARC particles file with 3 clicks per vesicle
    #[structopt(parse(from_os_str))]
    particles: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args_safe().unwrap_or_else(|_| {
        eprintln!("{}", USAGE);
        process::exit(1)
    });

    let records = RecordArray::load(&opt.particles)
        .with_context(|| format!("failed to load {:?}", opt.particles))?;
    let layout = FieldLayout::probe(&records, Some(opt.job_id.as_str()))
        .with_context(|| format!("failed to locate the fields of {:?}", opt.particles))?;
    let build = build_model(&records, &layout)?;
    println!(
        "{} vesicles processed, {} skipped",
        build.model.n_vesicle(),
        build.skipped.len()
    );

    fs::create_dir_all(VESICLE_DATA)?;
    let name = basename(&opt.particles.display().to_string());
    let path = PathBuf::from(VESICLE_DATA).join(format!("{}.json", file_stem(&name)));
    build
        .model
        .save(&path)
        .with_context(|| format!("failed to write {:?}", path))?;
    log::info!("Vesicle model written to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use structopt::clap::ErrorKind;

    #[test]
    fn positional_arguments_only() {
        assert!(Opt::from_iter_safe(["cs_to_vesicle_model", "J3"]).is_err());
        assert!(Opt::from_iter_safe(["cs_to_vesicle_model", "J3", "a.cs", "b.cs"]).is_err());
        for flag in ["--help", "--version"] {
            let kind = Opt::from_iter_safe(["cs_to_vesicle_model", flag, "a.cs"])
                .err()
                .map(|e| e.kind);
            assert!(
                !matches!(kind, Some(ErrorKind::HelpDisplayed | ErrorKind::VersionDisplayed)),
                "{}: {:?}",
                flag,
                kind
            );
        }
        let opt = Opt::from_iter_safe(["cs_to_vesicle_model", "J3", "a.cs"]).unwrap();
        assert_eq!(opt.job_id, "J3");
        assert_eq!(opt.particles, PathBuf::from("a.cs"));
    }
}
