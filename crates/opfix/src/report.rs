use std::fmt;

use crate::format::RegisterField;

/// A single divergence between the CPU-under-test and a vector's final state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mismatch {
    Register {
        field: RegisterField,
        expected: u16,
        actual: u16,
    },
    /// Flags differ in at least one bit of `mask`. Both values are already masked.
    Flags {
        expected: u16,
        actual: u16,
        mask: u16,
    },
    Memory {
        addr: u32,
        expected: u8,
        actual: u8,
    },
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Mismatch::Register {
                field,
                expected,
                actual,
            } => write!(
                f,
                "register {field}: expected {expected:#06x} ({expected}) but found {actual:#06x} ({actual})"
            ),
            Mismatch::Flags {
                expected,
                actual,
                mask,
            } => write!(
                f,
                "flags (mask {mask:#06x}): expected {expected:#06x} ({expected}) but found {actual:#06x} ({actual})"
            ),
            Mismatch::Memory {
                addr,
                expected,
                actual,
            } => write!(
                f,
                "memory at {addr:#07x}: expected {expected:#04x} ({expected}) but found {actual:#04x} ({actual})"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorFailure {
    pub index: usize,
    pub name: String,
    pub mismatches: Vec<Mismatch>,
}

impl fmt::Display for VectorFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "vector {} ({:?}):", self.index, self.name)?;
        for mismatch in &self.mismatches {
            writeln!(f, "  - {mismatch}")?;
        }
        Ok(())
    }
}

/// Every divergent vector of one fixture, surfaced as one failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    pub fixture: String,
    pub total: usize,
    pub failures: Vec<VectorFailure>,
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {} of {} vectors diverged",
            self.fixture,
            self.failures.len(),
            self.total
        )?;
        for failure in &self.failures {
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}
