//! Conformance fixtures for 8088-family CPU emulators.
//!
//! Third-party single-step corpora (one JSON record per executed instruction) are filtered by
//! a per-variant skip policy, encoded into compact binary fixtures, and replayed against a
//! CPU-under-test:
//!
//! corpus -> [`OpcodeIndex`] + [`SkipPolicy`] -> [`Encoder`] -> fixture file -> [`Harness`]
//!
//! The harness only needs the [`CpuUnderTest`] surface. Fixtures are independent of one
//! another, so separate fixtures can be encoded or replayed on separate threads.

#![forbid(unsafe_code)]

mod config;
mod corpus;
mod encoder;
mod error;
mod format;
mod harness;
mod index;
mod io;
mod policy;
mod report;

pub use crate::config::{parse_skip_list, ConfigError, GenConfig, ReplayOptions};
pub use crate::corpus::{parse_vectors, CorpusSource, DirCorpus, RawRegisters, RawState, RawVector};
pub use crate::encoder::{generate, select_classes, EncodeStats, Encoder, GenerateSummary};
pub use crate::error::{Error, LookupError, Result};
pub use crate::format::{
    Fixture, FixtureClass, FixtureReader, FixtureWriter, MemoryWrite, RegisterField, Registers,
    TestVector, FLAGS_ALL_DEFINED, FLAG_AF, FLAG_CF, FLAG_DF, FLAG_IF, FLAG_OF, FLAG_PF, FLAG_SF,
    FLAG_TF, FLAG_ZF, MAX_ADDRESS, MAX_NAME_LEN,
};
pub use crate::harness::{
    has_unsupported_prefix, CpuUnderTest, Harness, ReplayOutcome, Step, VectorResult, VectorRun,
    DIVIDE_VECTOR_HANDLER, UNSUPPORTED_PREFIX_MARKERS,
};
pub use crate::index::{OpcodeEntry, OpcodeIndex};
pub use crate::policy::{SkipEntry, SkipPolicy, SkipReason, SkipRule, Variant};
pub use crate::report::{FailureReport, Mismatch, VectorFailure};
