use std::{
    fmt,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    str::FromStr,
};

use tracing::{debug, info};
use zip::{result::ZipError, ZipArchive};

use crate::error::{Error, Result};

/// Separates the archive path from the member name or pattern.
pub const MEMBER_SEPARATOR: char = '@';

/// A member name with this in it is a pattern. `?` and `[` only mean
/// something once it is.
const GLOB_TRIGGER: char = '*';

/// Where to find the pickle bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// A plain pickle file.
    File(PathBuf),
    /// `archive.zip@member`: a member of a zip archive, by exact name.
    Member { archive: PathBuf, member: String },
    /// `archive.zip@pattern`: the first member (in archive order) whose
    /// name matches a shell-style glob. `*` also matches `/`.
    Pattern { archive: PathBuf, pattern: String },
}

impl Locator {
    /// Split at the first `@`. Anything after it with a glob metacharacter
    /// is a pattern, otherwise it's an exact member name.
    pub fn parse(s: &str) -> Result<Self> {
        let Some((archive, member)) = s.split_once(MEMBER_SEPARATOR) else {
            return Ok(Self::File(s.into()));
        };
        let archive = PathBuf::from(archive);
        if !member.contains(GLOB_TRIGGER) {
            return Ok(Self::Member {
                archive,
                member: member.to_owned(),
            });
        }
        compile_pattern(member)?;
        Ok(Self::Pattern {
            archive,
            pattern: member.to_owned(),
        })
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::File(path) => path,
            Self::Member { archive, .. } | Self::Pattern { archive, .. } => archive,
        }
    }

    /// Read the whole pickle into memory. Files and archives are closed
    /// again before this returns.
    pub fn read(&self) -> Result<Vec<u8>> {
        match self {
            Self::File(path) => {
                let mut fp = File::open(path).map_err(|e| Error::open(path, e))?;
                let mut buf = Vec::with_capacity(
                    fp.metadata().map(|md| md.len() as usize).unwrap_or(16384),
                );
                fp.read_to_end(&mut buf).map_err(|e| Error::open(path, e))?;
                debug!(path = %path.display(), len = buf.len(), "read pickle file");
                Ok(buf)
            }
            Self::Member { archive, member } => {
                let mut zp = open_archive(archive)?;
                read_member(&mut zp, archive, member)
            }
            Self::Pattern { archive, pattern } => {
                let pat = compile_pattern(pattern)?;
                let mut zp = open_archive(archive)?;
                let mut found = None;
                for idx in 0..zp.len() {
                    let zf = zp.by_index_raw(idx).map_err(|e| Error::archive(archive, e))?;
                    if pat.matches(zf.name()) {
                        found = Some(zf.name().to_owned());
                        break;
                    }
                }
                let Some(member) = found else {
                    return Err(Error::NoMatchingMember {
                        archive: archive.clone(),
                        pattern: pattern.clone(),
                    });
                };
                info!(%pattern, %member, "using first matching member");
                read_member(&mut zp, archive, &member)
            }
        }
    }
}

impl FromStr for Locator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Member {
                archive,
                member: name,
            }
            | Self::Pattern {
                archive,
                pattern: name,
            } => write!(f, "{}{MEMBER_SEPARATOR}{name}", archive.display()),
        }
    }
}

fn compile_pattern(pattern: &str) -> Result<glob::Pattern> {
    glob::Pattern::new(pattern).map_err(|e| Error::BadPattern {
        pattern: pattern.to_owned(),
        details: e.to_string(),
    })
}

fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    let fp = File::open(path).map_err(|e| Error::open(path, e))?;
    ZipArchive::new(fp).map_err(|e| Error::archive(path, e))
}

fn read_member(zp: &mut ZipArchive<File>, archive: &Path, member: &str) -> Result<Vec<u8>> {
    let mut zf = zp.by_name(member).map_err(|e| match e {
        ZipError::FileNotFound => Error::MemberNotFound {
            archive: archive.to_owned(),
            member: member.to_owned(),
        },
        e => Error::archive(archive, e),
    })?;
    let mut buf = Vec::with_capacity(zf.size() as usize);
    zf.read_to_end(&mut buf)
        .map_err(|e| Error::archive(archive, e.into()))?;
    debug!(archive = %archive.display(), member, len = buf.len(), "read archive member");
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_file() {
        assert_eq!(
            Locator::parse("dir/data.pkl").unwrap(),
            Locator::File("dir/data.pkl".into())
        );
    }

    #[test]
    fn exact_member() {
        assert_eq!(
            Locator::parse("model.pt@archive/data.pkl").unwrap(),
            Locator::Member {
                archive: "model.pt".into(),
                member: "archive/data.pkl".into()
            }
        );
    }

    #[test]
    fn splits_at_first_separator() {
        assert_eq!(
            Locator::parse("a.zip@b@c.pkl").unwrap(),
            Locator::Member {
                archive: "a.zip".into(),
                member: "b@c.pkl".into()
            }
        );
    }

    #[test]
    fn glob_member() {
        for pat in ["*/data.pkl", "data?.pkl*", "*[ab].pkl"] {
            let loc = Locator::parse(&format!("model.zip@{pat}")).unwrap();
            assert_eq!(
                loc,
                Locator::Pattern {
                    archive: "model.zip".into(),
                    pattern: pat.into()
                }
            );
            assert_eq!(loc.to_string(), format!("model.zip@{pat}"));
        }
    }

    #[test]
    fn star_crosses_directories() {
        let pat = compile_pattern("*.pkl").unwrap();
        assert!(pat.matches("archive/nested/data.pkl"));
        assert!(!pat.matches("archive/data.bin"));
    }

    #[test]
    fn brackets_without_star_are_literal() {
        for member in ["data?.pkl", "weights[0].pkl"] {
            assert_eq!(
                Locator::parse(&format!("model.zip@{member}")).unwrap(),
                Locator::Member {
                    archive: "model.zip".into(),
                    member: member.into()
                }
            );
        }
    }

    #[test]
    fn bad_pattern() {
        let err = Locator::parse("model.zip@[*").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Locator);
        assert!(matches!(err, Error::BadPattern { .. }), "{err}");
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let loc = Locator::File(dir.path().join("nope.pkl"));
        let err = loc.read().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Locator);
    }
}
