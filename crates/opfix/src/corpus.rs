//! Raw per-opcode test corpus records and where they come from.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde::de::IgnoredAny;
use serde::Deserialize;
use serde_json::error::Category;

use crate::error::{Error, Result};
use crate::format::{FixtureClass, RegisterField, Registers};

/// Register record as it appears in the corpus. Final-state records of some corpora omit
/// registers the instruction left unchanged.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RawRegisters {
    pub ax: Option<u16>,
    pub bx: Option<u16>,
    pub cx: Option<u16>,
    pub dx: Option<u16>,
    pub cs: Option<u16>,
    pub ss: Option<u16>,
    pub ds: Option<u16>,
    pub es: Option<u16>,
    pub sp: Option<u16>,
    pub bp: Option<u16>,
    pub si: Option<u16>,
    pub di: Option<u16>,
    pub ip: Option<u16>,
    pub flags: Option<u16>,
}

impl RawRegisters {
    pub fn get(&self, field: RegisterField) -> Option<u16> {
        match field {
            RegisterField::Ax => self.ax,
            RegisterField::Bx => self.bx,
            RegisterField::Cx => self.cx,
            RegisterField::Dx => self.dx,
            RegisterField::Cs => self.cs,
            RegisterField::Ss => self.ss,
            RegisterField::Ds => self.ds,
            RegisterField::Es => self.es,
            RegisterField::Sp => self.sp,
            RegisterField::Bp => self.bp,
            RegisterField::Si => self.si,
            RegisterField::Di => self.di,
            RegisterField::Ip => self.ip,
            RegisterField::Flags => self.flags,
        }
    }

    /// All fields must be present.
    pub fn complete(&self) -> std::result::Result<Registers, RegisterField> {
        let mut regs = Registers::default();
        for field in RegisterField::ALL {
            regs.set(field, self.get(field).ok_or(field)?);
        }
        Ok(regs)
    }

    /// Missing fields take their value from `base`.
    pub fn over(&self, base: &Registers) -> Registers {
        let mut regs = *base;
        for field in RegisterField::ALL {
            if let Some(value) = self.get(field) {
                regs.set(field, value);
            }
        }
        regs
    }

    pub fn from_registers(regs: &Registers) -> Self {
        let mut raw = RawRegisters::default();
        for field in RegisterField::ALL {
            raw.set(field, regs.get(field));
        }
        raw
    }

    fn set(&mut self, field: RegisterField, value: u16) {
        let slot = match field {
            RegisterField::Ax => &mut self.ax,
            RegisterField::Bx => &mut self.bx,
            RegisterField::Cx => &mut self.cx,
            RegisterField::Dx => &mut self.dx,
            RegisterField::Cs => &mut self.cs,
            RegisterField::Ss => &mut self.ss,
            RegisterField::Ds => &mut self.ds,
            RegisterField::Es => &mut self.es,
            RegisterField::Sp => &mut self.sp,
            RegisterField::Bp => &mut self.bp,
            RegisterField::Si => &mut self.si,
            RegisterField::Di => &mut self.di,
            RegisterField::Ip => &mut self.ip,
            RegisterField::Flags => &mut self.flags,
        };
        *slot = Some(value);
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawState {
    pub regs: RawRegisters,
    /// `[address, value]` pairs.
    #[serde(default)]
    pub ram: Vec<[u32; 2]>,
    #[serde(default)]
    pub queue: Vec<u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawVector {
    pub name: String,
    #[serde(default)]
    pub bytes: Vec<u8>,
    pub initial: RawState,
    #[serde(rename = "final")]
    pub final_state: RawState,
    /// Per-step bus cycle records. Only the number of entries is used.
    #[serde(default)]
    pub cycles: Vec<IgnoredAny>,
}

/// Parses a corpus document (a JSON array of records).
pub fn parse_vectors<R: Read>(r: R) -> serde_json::Result<Vec<RawVector>> {
    serde_json::from_reader(BufReader::new(r))
}

/// Supplies the raw records for one fixture class.
pub trait CorpusSource {
    fn fetch(&self, class: FixtureClass) -> Result<Vec<RawVector>>;
}

/// Corpus files stored in a local directory, as `XX.json.gz`, `XX.N.json.gz` or the
/// uncompressed `.json` equivalents.
#[derive(Debug, Clone)]
pub struct DirCorpus {
    root: PathBuf,
}

impl DirCorpus {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn locate(&self, class: FixtureClass) -> Option<PathBuf> {
        let gz = self.root.join(class.corpus_file_name());
        if gz.is_file() {
            return Some(gz);
        }
        let plain = self.root.join(format!("{class}.json"));
        plain.is_file().then_some(plain)
    }
}

impl CorpusSource for DirCorpus {
    fn fetch(&self, class: FixtureClass) -> Result<Vec<RawVector>> {
        let Some(path) = self.locate(class) else {
            return Err(Error::Acquisition {
                path: self.root.join(class.corpus_file_name()),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        };

        let file = File::open(&path).map_err(|source| Error::Acquisition {
            path: path.clone(),
            source,
        })?;
        let parsed = if path.extension().is_some_and(|ext| ext == "gz") {
            parse_vectors(GzDecoder::new(BufReader::new(file)))
        } else {
            parse_vectors(file)
        };
        parsed.map_err(|e| match e.classify() {
            Category::Io | Category::Eof => Error::Acquisition {
                path,
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            },
            Category::Syntax | Category::Data => Error::MalformedCorpus { path, source: e },
        })
    }
}
