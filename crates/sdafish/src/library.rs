//! Sequencing library format descriptors.
//!
//! A library type string looks like `T=PE:O=><:S=SA`: read type, relative
//! orientation of the mates, and strandedness, colon-separated.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadType {
    SingleEnd,
    PairedEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOrientation {
    /// Mates point the same way: `>>`.
    Same,
    /// Mates point away from each other: `<>`.
    Away,
    /// Mates point toward each other: `><`.
    Toward,
    /// No orientation (single-end).
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrandedness {
    /// First mate sense, second antisense.
    SenseAntisense,
    /// First mate antisense, second sense.
    AntisenseSense,
    Sense,
    Antisense,
    Unstranded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibraryFormat {
    pub read_type: ReadType,
    pub orientation: ReadOrientation,
    pub strandedness: ReadStrandedness,
}

impl LibraryFormat {
    /// Reject combinations that make no sense, like a paired-end library
    /// with no mate orientation.
    pub fn check(&self) -> Result<()> {
        match self.read_type {
            ReadType::PairedEnd => {
                if self.orientation == ReadOrientation::None {
                    return Err(Error::InvalidLibraryFormat(
                        "paired-end library requires a mate orientation".into(),
                    ));
                }
                if matches!(
                    self.strandedness,
                    ReadStrandedness::Sense | ReadStrandedness::Antisense
                ) {
                    return Err(Error::InvalidLibraryFormat(
                        "paired-end library requires a per-mate strandedness".into(),
                    ));
                }
            }
            ReadType::SingleEnd => {
                if self.orientation != ReadOrientation::None {
                    return Err(Error::InvalidLibraryFormat(
                        "single-end library cannot specify a mate orientation".into(),
                    ));
                }
                if matches!(
                    self.strandedness,
                    ReadStrandedness::SenseAntisense | ReadStrandedness::AntisenseSense
                ) {
                    return Err(Error::InvalidLibraryFormat(
                        "single-end library cannot specify paired strandedness".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl FromStr for LibraryFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut read_type = None;
        let mut orientation = None;
        let mut strandedness = None;
        for field in s.split(':') {
            let (key, value) = field.split_once('=').ok_or_else(|| {
                Error::InvalidLibraryFormat(format!("expected KEY=VALUE, found {field:?}"))
            })?;
            match key {
                "T" => {
                    read_type = Some(match value {
                        "SE" => ReadType::SingleEnd,
                        "PE" => ReadType::PairedEnd,
                        other => {
                            return Err(Error::InvalidLibraryFormat(format!(
                                "unknown read type {other:?}"
                            )))
                        }
                    });
                }
                "O" => {
                    orientation = Some(match value {
                        ">>" => ReadOrientation::Same,
                        "<>" => ReadOrientation::Away,
                        "><" => ReadOrientation::Toward,
                        "*" => ReadOrientation::None,
                        other => {
                            return Err(Error::InvalidLibraryFormat(format!(
                                "unknown orientation {other:?}"
                            )))
                        }
                    });
                }
                "S" => {
                    strandedness = Some(match value {
                        "SA" => ReadStrandedness::SenseAntisense,
                        "AS" => ReadStrandedness::AntisenseSense,
                        "S" => ReadStrandedness::Sense,
                        "A" => ReadStrandedness::Antisense,
                        "U" => ReadStrandedness::Unstranded,
                        other => {
                            return Err(Error::InvalidLibraryFormat(format!(
                                "unknown strandedness {other:?}"
                            )))
                        }
                    });
                }
                other => {
                    return Err(Error::InvalidLibraryFormat(format!(
                        "unknown field {other:?}"
                    )))
                }
            }
        }

        let read_type = read_type
            .ok_or_else(|| Error::InvalidLibraryFormat("missing read type (T=)".into()))?;
        let format = LibraryFormat {
            read_type,
            orientation: orientation.unwrap_or(ReadOrientation::None),
            strandedness: strandedness.unwrap_or(ReadStrandedness::Unstranded),
        };
        format.check()?;
        Ok(format)
    }
}

impl fmt::Display for LibraryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = match self.read_type {
            ReadType::SingleEnd => "SE",
            ReadType::PairedEnd => "PE",
        };
        let o = match self.orientation {
            ReadOrientation::Same => ">>",
            ReadOrientation::Away => "<>",
            ReadOrientation::Toward => "><",
            ReadOrientation::None => "*",
        };
        let s = match self.strandedness {
            ReadStrandedness::SenseAntisense => "SA",
            ReadStrandedness::AntisenseSense => "AS",
            ReadStrandedness::Sense => "S",
            ReadStrandedness::Antisense => "A",
            ReadStrandedness::Unstranded => "U",
        };
        write!(f, "T={t}:O={o}:S={s}")
    }
}
