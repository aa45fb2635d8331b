//! Micrograph naming
//!
//! cryoSPARC stores micrograph paths such as
//! `J3/motioncorrected/012345678_FoilHole_1_Data_2.mrc`; the leading number of the file
//! name is the micrograph uid and is what links particles to micrographs across jobs.

use std::fmt;

/// File name past the last `/`, with any quote characters removed
pub fn basename(path: &str) -> String {
    path.rsplit('/')
        .next()
        .unwrap_or(path)
        .replace(['\'', '"'], "")
}

/// Name with its last extension removed
pub fn file_stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(i) if i > 0 => &name[..i],
        _ => name,
    }
}

/// Key matching a micrograph across pick and template files
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MicrographKey {
    Uid(u64),
    Name(String),
}
impl MicrographKey {
    pub fn new(name: &str) -> Self {
        let name = basename(name);
        match name.split_once('_').map(|(uid, _)| uid.parse::<u64>()) {
            Some(Ok(uid)) => MicrographKey::Uid(uid),
            _ => MicrographKey::Name(name),
        }
    }
}
impl fmt::Display for MicrographKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MicrographKey::Uid(uid) => write!(f, "{}", uid),
            MicrographKey::Name(name) => write!(f, "{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert_eq!(
            basename("J3/motioncorrected/0123_foil.mrc"),
            "0123_foil.mrc"
        );
        assert_eq!(basename("b'J3/x/0123_foil.mrc'"), "0123_foil.mrc");
        assert_eq!(basename("plain.mrc"), "plain.mrc");
        assert_eq!(file_stem("P12_J40_picked_particles.cs"), "P12_J40_picked_particles");
        assert_eq!(file_stem("a.b.json"), "a.b");
        assert_eq!(file_stem("noext"), "noext");
    }

    #[test]
    fn keys() {
        assert_eq!(
            MicrographKey::new("J3/motioncorrected/0123_foil.mrc"),
            MicrographKey::Uid(123)
        );
        assert_eq!(
            MicrographKey::new("0123_foil.mrc"),
            MicrographKey::new("J9/other/0123_patch_aligned.mrc")
        );
        assert_eq!(
            MicrographKey::new("J3/foil_0123.mrc"),
            MicrographKey::Name("foil_0123.mrc".into())
        );
    }
}
