use std::{
    ffi::OsString,
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(".tmp");
    path.with_file_name(name)
}

/// Output files written next to their targets and moved in place together
///
/// Files are written to hidden siblings by [Staging::stage] and renamed onto their
/// targets by [Staging::commit]. Siblings of a staging that is dropped without being
/// committed are removed, leaving the targets as they were.
#[derive(Debug, Default)]
pub struct Staging {
    staged: Vec<(PathBuf, PathBuf)>,
}
impl Staging {
    /// Writes the content of `path` to its hidden sibling
    pub fn stage<P, F, E>(&mut self, path: P, write: F) -> Result<(), E>
    where
        P: AsRef<Path>,
        F: FnOnce(&mut BufWriter<File>) -> Result<(), E>,
        E: From<io::Error>,
    {
        let path = path.as_ref();
        let temp = temp_path(path);
        let result = File::create(&temp).map_err(E::from).and_then(|file| {
            let mut writer = BufWriter::new(file);
            write(&mut writer)?;
            writer.flush()?;
            Ok(())
        });
        self.staged.push((temp, path.to_path_buf()));
        result
    }
    /// Moves every staged file onto its target
    pub fn commit(mut self) -> io::Result<()> {
        let staged = std::mem::take(&mut self.staged);
        let mut result = Ok(());
        for (temp, path) in &staged {
            if result.is_ok() {
                result = fs::rename(temp, path);
            }
            if result.is_err() {
                let _ = fs::remove_file(temp);
            }
        }
        result
    }
}
impl Drop for Staging {
    fn drop(&mut self) {
        for (temp, _) in &self.staged {
            let _ = fs::remove_file(temp);
        }
    }
}

/// Writes a file through a hidden sibling that is renamed onto `path` once `write` succeeds
///
/// On failure the sibling is removed and `path` is left as it was.
pub fn write_atomic<P, F, E>(path: P, write: F) -> Result<(), E>
where
    P: AsRef<Path>,
    F: FnOnce(&mut BufWriter<File>) -> Result<(), E>,
    E: From<io::Error>,
{
    let mut staging = Staging::default();
    staging.stage(path, write)?;
    staging.commit().map_err(E::from)
}
