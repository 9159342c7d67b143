//! Turns raw corpus records into fixtures.

use std::fs::{self, File};
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use crate::corpus::{CorpusSource, RawVector};
use crate::error::{Error, LookupError, Result};
use crate::format::{
    FixtureClass, FixtureWriter, MemoryWrite, TestVector, MAX_ADDRESS, MAX_NAME_LEN,
};
use crate::index::OpcodeIndex;
use crate::policy::{SkipPolicy, Variant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeStats {
    pub class: FixtureClass,
    pub written: u32,
    /// Vectors dropped by sub-opcode rules found while scanning the corpus.
    pub skipped: usize,
}

pub struct Encoder<'a> {
    index: &'a OpcodeIndex,
    policy: &'a SkipPolicy,
}

impl<'a> Encoder<'a> {
    pub fn new(index: &'a OpcodeIndex, policy: &'a SkipPolicy) -> Self {
        Self { index, policy }
    }

    pub fn variant(&self) -> Variant {
        self.policy.variant()
    }

    /// Encodes `raws` as the fixture for `class`.
    ///
    /// A class the policy excludes yields an empty fixture. When `class` names a bare opcode
    /// that the metadata splits into sub-opcodes, each vector's sub-opcode is read from its
    /// instruction bytes and checked against the policy individually.
    pub fn encode_class<W: Write + Seek>(
        &self,
        class: FixtureClass,
        raws: &[RawVector],
        w: &mut W,
    ) -> Result<EncodeStats> {
        let class_mask = self.index.flags_mask(class.opcode, class.sub)?;
        let per_vector = class.sub.is_none() && self.index.has_sub_opcodes(class.opcode);

        let admitted = self.policy.admits(class);

        let mut writer = FixtureWriter::new(w)?;
        let mut skipped = 0;
        for (idx, raw) in raws.iter().enumerate() {
            if !admitted {
                skipped += 1;
                continue;
            }

            let flags_mask = if per_vector {
                let sub = self.vector_sub_opcode(class, idx, raw)?;
                if !self.policy.is_eligible(class.opcode, Some(sub)) {
                    skipped += 1;
                    continue;
                }
                self.index.flags_mask(class.opcode, Some(sub))?
            } else {
                class_mask
            };

            let vector = self.resolve(idx, raw, flags_mask)?;
            writer.push(&vector)?;
        }
        let written = writer.finish()?;

        Ok(EncodeStats {
            class,
            written,
            skipped,
        })
    }

    fn vector_sub_opcode(&self, class: FixtureClass, idx: usize, raw: &RawVector) -> Result<u8> {
        match self.policy.sub_opcode_of(&raw.bytes) {
            Some((opcode, sub)) if opcode == class.opcode => Ok(sub),
            Some((opcode, _)) => Err(malformed(
                idx,
                raw,
                format!("instruction bytes encode opcode {opcode:02X}, not {:02X}", class.opcode),
            )),
            None => Err(malformed(idx, raw, "instruction bytes carry no ModR/M byte")),
        }
    }

    /// Converts one raw record, validating it against the fixture format.
    pub fn resolve(&self, idx: usize, raw: &RawVector, flags_mask: u16) -> Result<TestVector> {
        if raw.name.len() > MAX_NAME_LEN {
            return Err(malformed(idx, raw, format!("name exceeds {MAX_NAME_LEN} bytes")));
        }
        if raw.name.as_bytes().contains(&0) {
            return Err(malformed(idx, raw, "name contains a NUL byte"));
        }

        let initial_regs = raw
            .initial
            .regs
            .complete()
            .map_err(|field| malformed(idx, raw, format!("initial state lacks register {field}")))?;
        let final_regs = if self.variant().final_regs_may_be_partial() {
            raw.final_state.regs.over(&initial_regs)
        } else {
            raw.final_state
                .regs
                .complete()
                .map_err(|field| malformed(idx, raw, format!("final state lacks register {field}")))?
        };

        let initial_ram = memory_writes(idx, raw, &raw.initial.ram)?;
        let final_ram = memory_writes(idx, raw, &raw.final_state.ram)?;

        let cycles = u16::try_from(raw.cycles.len())
            .map_err(|_| malformed(idx, raw, "cycle list does not fit 16 bits"))?;
        let queue_len = u8::try_from(raw.final_state.queue.len())
            .map_err(|_| malformed(idx, raw, "instruction queue does not fit 8 bits"))?;

        Ok(TestVector {
            name: raw.name.clone(),
            flags_mask,
            initial_regs,
            initial_ram,
            final_regs,
            final_ram,
            cycles,
            queue_len,
        })
    }

    /// Writes `<dir>/<class>.bin`, replacing any previous fixture only once the new one is
    /// complete.
    pub fn write_fixture(
        &self,
        class: FixtureClass,
        raws: &[RawVector],
        dir: &Path,
    ) -> Result<EncodeStats> {
        let path = dir.join(class.fixture_file_name());
        let tmp_path = dir.join(format!("{}.tmp", class.fixture_file_name()));

        let result = (|| -> Result<EncodeStats> {
            let mut out = BufWriter::new(File::create(&tmp_path)?);
            let stats = self.encode_class(class, raws, &mut out)?;
            out.into_inner().map_err(|e| e.into_error())?.sync_all()?;
            fs::rename(&tmp_path, &path)?;
            Ok(stats)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }
}

fn malformed(idx: usize, raw: &RawVector, reason: impl Into<String>) -> Error {
    Error::MalformedRecord {
        index: idx,
        name: raw.name.clone(),
        reason: reason.into(),
    }
}

fn memory_writes(idx: usize, raw: &RawVector, ram: &[[u32; 2]]) -> Result<Vec<MemoryWrite>> {
    if ram.len() > usize::from(u16::MAX) {
        return Err(malformed(idx, raw, "too many memory entries"));
    }
    ram.iter()
        .map(|&[addr, value]| {
            if addr > MAX_ADDRESS {
                return Err(malformed(idx, raw, format!("address {addr:#x} is out of range")));
            }
            let value = u8::try_from(value)
                .map_err(|_| malformed(idx, raw, format!("value {value} at {addr:#x} is not a byte")))?;
            Ok(MemoryWrite { addr, value })
        })
        .collect()
}

/// Classes to generate. With no `opcodes`, every class in the table; otherwise only the
/// classes of the listed opcodes, each of which must exist in the table.
pub fn select_classes(index: &OpcodeIndex, opcodes: &[u8]) -> Result<Vec<FixtureClass>> {
    for &opcode in opcodes {
        if !index.contains_opcode(opcode) {
            return Err(LookupError::MissingOpcode(opcode).into());
        }
    }
    Ok(index
        .classes()
        .into_iter()
        .filter(|class| opcodes.is_empty() || opcodes.contains(&class.opcode))
        .collect())
}

#[derive(Debug, Clone, Default)]
pub struct GenerateSummary {
    pub encoded: Vec<EncodeStats>,
    pub excluded: Vec<FixtureClass>,
    pub unavailable: Vec<FixtureClass>,
    pub out_dir: PathBuf,
}

impl GenerateSummary {
    pub fn vectors_written(&self) -> u64 {
        self.encoded.iter().map(|s| u64::from(s.written)).sum()
    }

    /// Every requested class was either encoded or deliberately excluded.
    pub fn is_complete(&self) -> bool {
        self.unavailable.is_empty()
    }
}

/// Encodes every eligible class in `classes` into `out_dir`.
///
/// An unavailable corpus file only skips its class. Metadata drift and malformed records
/// abort the pass. Fixtures left in `out_dir` for classes the policy now excludes are removed.
pub fn generate<C: CorpusSource + ?Sized>(
    encoder: &Encoder<'_>,
    corpus: &C,
    classes: &[FixtureClass],
    out_dir: &Path,
) -> Result<GenerateSummary> {
    fs::create_dir_all(out_dir)?;
    let mut summary = GenerateSummary {
        out_dir: out_dir.to_path_buf(),
        ..GenerateSummary::default()
    };

    for &class in classes {
        if let Some(entry) = encoder.policy.exclusion(class.opcode, class.sub) {
            tracing::debug!(class = %class, reason = ?entry.reason, "excluded by skip policy");
            remove_stale_fixture(class, out_dir)?;
            summary.excluded.push(class);
            continue;
        }

        let raws = match corpus.fetch(class) {
            Ok(raws) => raws,
            Err(err) if !err.is_fatal() => {
                tracing::warn!(class = %class, "skipping: {err}");
                summary.unavailable.push(class);
                continue;
            }
            Err(err) => return Err(err),
        };

        let stats = encoder.write_fixture(class, &raws, out_dir)?;
        tracing::info!(
            class = %class,
            vectors = stats.written,
            skipped = stats.skipped,
            "encoded fixture"
        );
        summary.encoded.push(stats);
    }

    Ok(summary)
}

/// An excluded class must not keep a fixture from an earlier run under another policy.
fn remove_stale_fixture(class: FixtureClass, out_dir: &Path) -> Result<()> {
    let path = out_dir.join(class.fixture_file_name());
    match fs::remove_file(&path) {
        Ok(()) => {
            tracing::info!(class = %class, path = %path.display(), "removed stale fixture");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
