//! Replays fixtures against a CPU-under-test.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::config::ReplayOptions;
use crate::error::{Error, Result};
use crate::format::{FixtureReader, RegisterField, Registers, TestVector};
use crate::policy::Variant;
use crate::report::{FailureReport, Mismatch, VectorFailure};

/// Handler the baseline harness installs in interrupt vector zero, as `(offset, segment)`.
pub const DIVIDE_VECTOR_HANDLER: (u16, u16) = (0x4000, 0x0000);

/// Name fragments of the conditional-repeat prefixes the extended variant does not model.
pub const UNSUPPORTED_PREFIX_MARKERS: [&str; 2] = ["repc", "repnc"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Step {
    pub cycles: u32,
    /// The instruction raised a hardware interrupt or exception.
    pub interrupt: bool,
}

/// The narrow surface the harness drives. Nothing else of the CPU is inspected.
pub trait CpuUnderTest {
    type Error: std::fmt::Display;

    fn reset(&mut self);

    /// Recomputes state the CPU derives from its segment registers.
    fn reload_segment_caches(&mut self);

    fn registers(&self) -> &Registers;
    fn registers_mut(&mut self) -> &mut Registers;

    fn write_byte(&mut self, addr: u32, value: u8);
    fn write_word(&mut self, addr: u32, value: u16);
    fn read_byte(&mut self, addr: u32) -> u8;

    /// Executes one instruction. `None` means no cycle budget.
    fn step(&mut self, cycle_budget: Option<u32>) -> std::result::Result<Step, Self::Error>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VectorResult {
    Passed,
    Failed(Vec<Mismatch>),
    /// Not executed; neither a pass nor a failure.
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayOutcome {
    pub fixture: String,
    pub total: usize,
    pub passed: usize,
    pub skipped: usize,
    /// Vectors whose step raised an interrupt (flags and memory were not compared).
    pub interrupted: usize,
    pub timing_advisories: usize,
    pub failures: Vec<VectorFailure>,
}

impl ReplayOutcome {
    pub fn is_pass(&self) -> bool {
        self.failures.is_empty()
    }

    /// Folds every recorded divergence into a single [`Error::Mismatch`].
    pub fn into_result(self) -> Result<Self> {
        if self.is_pass() {
            return Ok(self);
        }
        Err(Error::Mismatch(FailureReport {
            fixture: self.fixture,
            total: self.total,
            failures: self.failures,
        }))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Harness {
    variant: Variant,
    options: ReplayOptions,
}

impl Harness {
    pub fn new(variant: Variant, options: ReplayOptions) -> Self {
        Self { variant, options }
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn replay_file<C: CpuUnderTest + ?Sized>(
        &self,
        path: &Path,
        cpu: &mut C,
    ) -> Result<ReplayOutcome> {
        let file = File::open(path)?;
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.replay(&label, BufReader::new(file), cpu)
    }

    /// Runs every vector of the fixture in `r`. Register, flag and memory divergences are
    /// collected and do not stop the run; a truncated fixture or a failing step does.
    pub fn replay<R: Read, C: CpuUnderTest + ?Sized>(
        &self,
        label: &str,
        r: R,
        cpu: &mut C,
    ) -> Result<ReplayOutcome> {
        let mut reader = FixtureReader::new(r)?;
        let mut outcome = ReplayOutcome {
            fixture: label.to_string(),
            ..ReplayOutcome::default()
        };

        let mut index = 0;
        while let Some(vector) = reader.next_vector()? {
            let run = self.run_vector(index, &vector, cpu)?;
            outcome.total += 1;
            if run.interrupted {
                outcome.interrupted += 1;
            }
            if run.timing_mismatch {
                outcome.timing_advisories += 1;
            }
            match run.result {
                VectorResult::Passed => outcome.passed += 1,
                VectorResult::Skipped => outcome.skipped += 1,
                VectorResult::Failed(mismatches) => {
                    tracing::debug!(
                        fixture = label,
                        index,
                        name = %vector.name,
                        mismatches = mismatches.len(),
                        "vector diverged"
                    );
                    outcome.failures.push(VectorFailure {
                        index,
                        name: vector.name,
                        mismatches,
                    });
                }
            }
            index += 1;
        }

        tracing::info!(
            fixture = label,
            total = outcome.total,
            passed = outcome.passed,
            failed = outcome.failures.len(),
            skipped = outcome.skipped,
            "replayed fixture"
        );
        Ok(outcome)
    }

    pub fn run_vector<C: CpuUnderTest + ?Sized>(
        &self,
        index: usize,
        vector: &TestVector,
        cpu: &mut C,
    ) -> Result<VectorRun> {
        cpu.reset();
        *cpu.registers_mut() = vector.initial_regs;
        cpu.reload_segment_caches();

        if self.variant.seeds_divide_vector() {
            let (offset, segment) = DIVIDE_VECTOR_HANDLER;
            cpu.write_word(0, offset);
            cpu.write_word(2, segment);
        }

        for mem in &vector.initial_ram {
            cpu.write_byte(mem.addr, mem.value);
        }

        if self.variant.skips_conditional_repeat() && has_unsupported_prefix(&vector.name) {
            return Ok(VectorRun {
                result: VectorResult::Skipped,
                interrupted: false,
                timing_mismatch: false,
            });
        }

        let step = cpu.step(None).map_err(|err| Error::Step {
            index,
            name: vector.name.clone(),
            message: err.to_string(),
        })?;

        let mut mismatches = Vec::new();
        let actual = *cpu.registers();
        for field in RegisterField::ALL {
            if field == RegisterField::Flags {
                continue;
            }
            let (expected, actual) = (vector.final_regs.get(field), actual.get(field));
            if expected != actual {
                mismatches.push(Mismatch::Register {
                    field,
                    expected,
                    actual,
                });
            }
        }

        // An interrupt pushes flags, undefined bits included, so neither the flags register
        // nor memory is meaningful afterwards.
        if !step.interrupt {
            let mask = vector.flags_mask;
            if (actual.flags ^ vector.final_regs.flags) & mask != 0 {
                mismatches.push(Mismatch::Flags {
                    expected: vector.final_regs.flags & mask,
                    actual: actual.flags & mask,
                    mask,
                });
            }

            for mem in &vector.final_ram {
                let found = cpu.read_byte(mem.addr);
                if found != mem.value {
                    mismatches.push(Mismatch::Memory {
                        addr: mem.addr,
                        expected: mem.value,
                        actual: found,
                    });
                }
            }
        }

        let timing_mismatch =
            self.options.report_cycles && u32::from(vector.cycles) != step.cycles;
        if timing_mismatch {
            tracing::info!(
                index,
                name = %vector.name,
                expected = vector.cycles,
                actual = step.cycles,
                "cycle count differs"
            );
        }

        let result = if mismatches.is_empty() {
            VectorResult::Passed
        } else {
            VectorResult::Failed(mismatches)
        };
        Ok(VectorRun {
            result,
            interrupted: step.interrupt,
            timing_mismatch,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorRun {
    pub result: VectorResult,
    pub interrupted: bool,
    pub timing_mismatch: bool,
}

pub fn has_unsupported_prefix(name: &str) -> bool {
    UNSUPPORTED_PREFIX_MARKERS.iter().any(|m| name.contains(m))
}
