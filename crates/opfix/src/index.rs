//! Per-opcode metadata: which opcode/sub-opcode combinations exist and which flag bits each
//! leaves undefined.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, LookupError, Result};
use crate::format::{FixtureClass, FLAGS_ALL_DEFINED};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeEntry {
    /// Explicit mask of the defined flags; `None` means every flag is defined.
    pub flags_mask: Option<u16>,
}

impl OpcodeEntry {
    pub fn effective_mask(&self) -> u16 {
        self.flags_mask.unwrap_or(FLAGS_ALL_DEFINED)
    }
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default, rename = "flags-mask")]
    flags_mask: Option<u64>,
    #[serde(default)]
    reg: Option<BTreeMap<String, RawEntry>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDocument {
    Wrapped { opcodes: BTreeMap<String, RawEntry> },
    Bare(BTreeMap<String, RawEntry>),
}

/// Flat `(opcode, sub-opcode)` table, loaded once and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct OpcodeIndex {
    entries: BTreeMap<(u8, Option<u8>), OpcodeEntry>,
}

impl OpcodeIndex {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let doc: RawDocument = serde_json::from_str(json)
            .map_err(|e| Error::Metadata(format!("metadata is not valid json: {e}")))?;
        let opcodes = match doc {
            RawDocument::Wrapped { opcodes } => opcodes,
            RawDocument::Bare(opcodes) => opcodes,
        };

        let mut index = OpcodeIndex::default();
        for (key, raw) in opcodes {
            let opcode = u8::from_str_radix(key.trim(), 16)
                .map_err(|_| Error::Metadata(format!("opcode key {key:?} is not a hex byte")))?;
            index.insert(opcode, None, parse_mask(&key, raw.flags_mask)?);

            for (sub_key, sub_raw) in raw.reg.unwrap_or_default() {
                let sub = sub_key
                    .trim()
                    .parse::<u8>()
                    .ok()
                    .filter(|sub| *sub < 8)
                    .ok_or_else(|| {
                        Error::Metadata(format!(
                            "opcode {key}: sub-opcode key {sub_key:?} is not in 0..=7"
                        ))
                    })?;
                let mask = parse_mask(&format!("{key}.{sub_key}"), sub_raw.flags_mask)?;
                index.insert(opcode, Some(sub), mask);
            }
        }
        Ok(index)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Metadata(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    pub fn insert(&mut self, opcode: u8, sub: Option<u8>, flags_mask: Option<u16>) {
        self.entries
            .insert((opcode, sub), OpcodeEntry { flags_mask });
    }

    pub fn entry(&self, opcode: u8, sub: Option<u8>) -> std::result::Result<&OpcodeEntry, LookupError> {
        if let Some(entry) = self.entries.get(&(opcode, sub)) {
            return Ok(entry);
        }
        match sub {
            Some(sub) if self.entries.contains_key(&(opcode, None)) => {
                Err(LookupError::MissingSubOpcode { opcode, sub })
            }
            _ => Err(LookupError::MissingOpcode(opcode)),
        }
    }

    /// Effective defined-flags mask for `(opcode, sub)`.
    pub fn flags_mask(&self, opcode: u8, sub: Option<u8>) -> std::result::Result<u16, LookupError> {
        self.entry(opcode, sub).map(OpcodeEntry::effective_mask)
    }

    pub fn has_sub_opcodes(&self, opcode: u8) -> bool {
        self.entries
            .range((opcode, Some(0))..=(opcode, Some(7)))
            .next()
            .is_some()
    }

    pub fn contains_opcode(&self, opcode: u8) -> bool {
        self.entries.contains_key(&(opcode, None))
    }

    /// Every fixture class the table describes, in ascending order. Opcodes with a sub-opcode
    /// table expand to one class per sub-opcode.
    pub fn classes(&self) -> Vec<FixtureClass> {
        self.entries
            .keys()
            .filter(|(opcode, sub)| sub.is_some() || !self.has_sub_opcodes(*opcode))
            .map(|&(opcode, sub)| FixtureClass { opcode, sub })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_mask(key: &str, raw: Option<u64>) -> Result<Option<u16>> {
    raw.map(|mask| {
        u16::try_from(mask)
            .map_err(|_| Error::Metadata(format!("opcode {key}: flags-mask {mask:#x} exceeds 16 bits")))
    })
    .transpose()
}
