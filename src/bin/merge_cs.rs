use anyhow::Context;
use indicatif::ParallelProgressIterator;
use rayon::prelude::*;
use std::{path::PathBuf, process};
use structopt::{clap::AppSettings, StructOpt};
use vesicle_picker::RecordArray;

const MERGED: &str = "merged_cs_out.cs";
const USAGE: &str = "usage: merge_cs <CS_FILE> <CS_FILE>...";

#[derive(Debug, StructOpt)]
#[structopt(
    name = "merge_cs",
    about = "Concatenates cryoSPARC .cs files",
    setting = AppSettings::DisableHelpFlags,
    setting = AppSettings::DisableVersion
)]
struct Opt {
    /// cryoSPARC files, in merge order
    #[structopt(parse(from_os_str), required = true, min_values = 2)]
    files: Vec<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args_safe().unwrap_or_else(|_| {
        eprintln!("{}", USAGE);
        process::exit(1)
    });

    let arrays = opt
        .files
        .par_iter()
        .progress_count(opt.files.len() as u64)
        .map(|path| {
            RecordArray::load(path).with_context(|| format!("failed to load {:?}", path))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    let merged = RecordArray::concat(arrays)
        .context("all the files must share the same record layout")?;
    merged
        .save(MERGED)
        .with_context(|| format!("failed to write {}", MERGED))?;
    println!("{} records written to {}", merged.len(), MERGED);
    Ok(())
}
