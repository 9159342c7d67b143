use std::io::Cursor;

use opfix::{
    CpuUnderTest, Error, Fixture, Harness, MemoryWrite, Mismatch, RegisterField, Registers,
    ReplayOptions, Step, TestVector, Variant, FLAGS_ALL_DEFINED, FLAG_CF, FLAG_ZF,
};
use proptest::prelude::*;

const MEM_SIZE: usize = 0x10_0000;

type Exec = Box<dyn FnMut(&mut Registers, &mut [u8]) -> Result<Step, String>>;

/// A CPU whose single instruction is whatever `exec` does.
struct MockCpu {
    regs: Registers,
    mem: Vec<u8>,
    exec: Exec,
    resets: usize,
    segment_reloads: usize,
}

impl MockCpu {
    fn new(exec: impl FnMut(&mut Registers, &mut [u8]) -> Result<Step, String> + 'static) -> Self {
        Self {
            regs: Registers::default(),
            mem: vec![0; MEM_SIZE],
            exec: Box::new(exec),
            resets: 0,
            segment_reloads: 0,
        }
    }
}

impl CpuUnderTest for MockCpu {
    type Error = String;

    fn reset(&mut self) {
        self.regs = Registers::default();
        self.mem.fill(0);
        self.resets += 1;
    }

    fn reload_segment_caches(&mut self) {
        self.segment_reloads += 1;
    }

    fn registers(&self) -> &Registers {
        &self.regs
    }

    fn registers_mut(&mut self) -> &mut Registers {
        &mut self.regs
    }

    fn write_byte(&mut self, addr: u32, value: u8) {
        self.mem[addr as usize & (MEM_SIZE - 1)] = value;
    }

    fn write_word(&mut self, addr: u32, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.write_byte(addr, lo);
        self.write_byte(addr.wrapping_add(1), hi);
    }

    fn read_byte(&mut self, addr: u32) -> u8 {
        self.mem[addr as usize & (MEM_SIZE - 1)]
    }

    fn step(&mut self, _cycle_budget: Option<u32>) -> Result<Step, String> {
        (self.exec)(&mut self.regs, &mut self.mem)
    }
}

fn inc_ax(regs: &mut Registers, _mem: &mut [u8]) -> Result<Step, String> {
    regs.ax = regs.ax.wrapping_add(1);
    regs.ip = regs.ip.wrapping_add(1);
    Ok(Step {
        cycles: 3,
        interrupt: false,
    })
}

fn inc_ax_vector(name: &str) -> TestVector {
    let initial = Registers {
        cs: 0x1000,
        ip: 0x0100,
        flags: 0xF002,
        ..Registers::default()
    };
    TestVector {
        name: name.to_string(),
        flags_mask: 0x0FD5,
        initial_regs: initial,
        initial_ram: vec![MemoryWrite::new(0x10100, 0x40)],
        final_regs: Registers {
            ax: 1,
            ip: 0x0101,
            ..initial
        },
        final_ram: vec![MemoryWrite::new(0x10100, 0x40)],
        cycles: 3,
        queue_len: 0,
    }
}

fn fixture_bytes(vectors: Vec<TestVector>) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    Fixture { vectors }.encode(&mut cursor).unwrap();
    cursor.into_inner()
}

fn harness(variant: Variant) -> Harness {
    Harness::new(variant, ReplayOptions::default())
}

/// All-zero registers, one byte of `0x90` at `0x100`, and only `ax` changing.
fn zero_state_vector() -> TestVector {
    TestVector {
        name: "inc ax".to_string(),
        flags_mask: 0x0FD5,
        initial_regs: Registers::default(),
        initial_ram: vec![MemoryWrite::new(0x100, 0x90)],
        final_regs: Registers {
            ax: 0x0001,
            ..Registers::default()
        },
        final_ram: vec![MemoryWrite::new(0x100, 0x90)],
        cycles: 0,
        queue_len: 0,
    }
}

#[test]
fn zero_state_vector_passes_when_ax_matches() {
    let bytes = fixture_bytes(vec![zero_state_vector()]);
    let mut cpu = MockCpu::new(|regs, _| {
        regs.ax = 0x0001;
        Ok(Step::default())
    });

    let outcome = harness(Variant::I8088)
        .replay("40.bin", Cursor::new(bytes), &mut cpu)
        .unwrap();
    assert_eq!(outcome.passed, 1);
    assert!(outcome.is_pass(), "{:?}", outcome.failures);
    assert_eq!(cpu.mem[0x100], 0x90);
}

#[test]
fn zero_state_vector_fails_when_ax_stays_zero() {
    let bytes = fixture_bytes(vec![zero_state_vector()]);
    let mut cpu = MockCpu::new(|_, _| Ok(Step::default()));

    let outcome = harness(Variant::I8088)
        .replay("40.bin", Cursor::new(bytes), &mut cpu)
        .unwrap();
    assert_eq!(outcome.passed, 0);
    assert_eq!(
        outcome.failures[0].mismatches,
        [Mismatch::Register {
            field: RegisterField::Ax,
            expected: 0x0001,
            actual: 0x0000,
        }]
    );
}

#[test]
fn matching_cpu_passes() {
    let bytes = fixture_bytes(vec![inc_ax_vector("inc ax"), inc_ax_vector("inc ax")]);
    let mut cpu = MockCpu::new(inc_ax);

    let outcome = harness(Variant::I8088)
        .replay("40.bin", Cursor::new(bytes), &mut cpu)
        .unwrap();
    assert_eq!(outcome.total, 2);
    assert_eq!(outcome.passed, 2);
    assert!(outcome.is_pass());
    assert_eq!(cpu.resets, 2);
    assert_eq!(cpu.segment_reloads, 2);
}

#[test]
fn register_divergence_fails_the_vector() {
    let bytes = fixture_bytes(vec![inc_ax_vector("inc ax")]);
    let mut cpu = MockCpu::new(|regs, _| {
        regs.ip = regs.ip.wrapping_add(1);
        Ok(Step::default())
    });

    let outcome = harness(Variant::I8088)
        .replay("40.bin", Cursor::new(bytes), &mut cpu)
        .unwrap();
    assert_eq!(outcome.passed, 0);
    assert_eq!(
        outcome.failures[0].mismatches,
        [Mismatch::Register {
            field: RegisterField::Ax,
            expected: 1,
            actual: 0,
        }]
    );

    let err = outcome.into_result().unwrap_err();
    assert!(matches!(err, Error::Mismatch(_)));
    assert!(err.to_string().contains("register ax: expected 0x0001 (1) but found 0x0000 (0)"));
}

#[test]
fn flags_outside_the_mask_are_ignored() {
    let mut vector = inc_ax_vector("inc ax");
    // Bit 15 is outside 0x0FD5.
    vector.final_regs.flags = 0x7002;
    let bytes = fixture_bytes(vec![vector]);

    let outcome = harness(Variant::I8088)
        .replay("40.bin", Cursor::new(bytes), &mut MockCpu::new(inc_ax))
        .unwrap();
    assert!(outcome.is_pass());
}

#[test]
fn flags_inside_the_mask_are_compared() {
    let mut vector = inc_ax_vector("inc ax");
    vector.final_regs.flags = 0xF002 | FLAG_ZF;
    let bytes = fixture_bytes(vec![vector]);

    let outcome = harness(Variant::I8088)
        .replay("40.bin", Cursor::new(bytes), &mut MockCpu::new(inc_ax))
        .unwrap();
    assert_eq!(
        outcome.failures[0].mismatches,
        [Mismatch::Flags {
            expected: (0xF002 | FLAG_ZF) & 0x0FD5,
            actual: 0xF002 & 0x0FD5,
            mask: 0x0FD5,
        }]
    );
}

#[test]
fn memory_divergence_is_reported_per_address() {
    let mut vector = inc_ax_vector("mov [0100h],al");
    vector.final_regs.ax = 0;
    vector.final_regs.ip = 0x0100;
    vector.final_ram = vec![
        MemoryWrite::new(0x100, 0x90),
        MemoryWrite::new(0x10100, 0x40),
    ];
    let bytes = fixture_bytes(vec![vector]);
    let mut cpu = MockCpu::new(|_, _| Ok(Step::default()));

    let outcome = harness(Variant::I8088)
        .replay("A2.bin", Cursor::new(bytes), &mut cpu)
        .unwrap();
    assert_eq!(
        outcome.failures[0].mismatches,
        [Mismatch::Memory {
            addr: 0x100,
            expected: 0x90,
            actual: 0,
        }]
    );
}

#[test]
fn interrupt_skips_flags_and_memory_but_not_registers() {
    let mut vector = inc_ax_vector("div bl");
    vector.final_regs.flags = 0xFFFF;
    vector.final_ram = vec![MemoryWrite::new(0x200, 0x55)];
    let bytes = fixture_bytes(vec![vector.clone()]);

    let raise = |regs: &mut Registers, _: &mut [u8]| {
        regs.ax = 1;
        regs.ip = 0x0101;
        Ok(Step {
            cycles: 3,
            interrupt: true,
        })
    };
    let outcome = harness(Variant::I8088)
        .replay("F6.6.bin", Cursor::new(bytes), &mut MockCpu::new(raise))
        .unwrap();
    assert!(outcome.is_pass());
    assert_eq!(outcome.interrupted, 1);

    let bytes = fixture_bytes(vec![vector]);
    let raise_wrong = |regs: &mut Registers, _: &mut [u8]| {
        regs.ip = 0x4000;
        Ok(Step {
            cycles: 3,
            interrupt: true,
        })
    };
    let outcome = harness(Variant::I8088)
        .replay("F6.6.bin", Cursor::new(bytes), &mut MockCpu::new(raise_wrong))
        .unwrap();
    let fields: Vec<_> = outcome.failures[0]
        .mismatches
        .iter()
        .map(|m| match m {
            Mismatch::Register { field, .. } => *field,
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(fields, [RegisterField::Ax, RegisterField::Ip]);
}

#[test]
fn conditional_repeat_is_skipped_only_on_v20() {
    let bytes = fixture_bytes(vec![inc_ax_vector("repc movsb"), inc_ax_vector("inc ax")]);

    let mut cpu = MockCpu::new(inc_ax);
    let outcome = harness(Variant::V20)
        .replay("A4.bin", Cursor::new(bytes.clone()), &mut cpu)
        .unwrap();
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.passed, 1);
    assert!(outcome.is_pass());

    let outcome = harness(Variant::I8088)
        .replay("A4.bin", Cursor::new(bytes), &mut MockCpu::new(inc_ax))
        .unwrap();
    assert_eq!(outcome.skipped, 0);
    assert_eq!(outcome.passed, 2);
}

#[test]
fn baseline_seeds_the_divide_vector() {
    let seen = |regs: &mut Registers, mem: &mut [u8]| {
        regs.ax = u16::from_le_bytes([mem[0], mem[1]]);
        regs.bx = u16::from_le_bytes([mem[2], mem[3]]);
        Ok(Step::default())
    };

    let mut vector = inc_ax_vector("div cl");
    vector.final_regs.ax = 0x4000;
    vector.final_regs.ip = 0x0100;
    vector.cycles = 0;
    let bytes = fixture_bytes(vec![vector]);

    let outcome = harness(Variant::I8088)
        .replay("F6.6.bin", Cursor::new(bytes.clone()), &mut MockCpu::new(seen))
        .unwrap();
    assert!(outcome.is_pass(), "{:?}", outcome.failures);

    let outcome = harness(Variant::V20)
        .replay("F6.6.bin", Cursor::new(bytes), &mut MockCpu::new(seen))
        .unwrap();
    assert_eq!(
        outcome.failures[0].mismatches,
        [Mismatch::Register {
            field: RegisterField::Ax,
            expected: 0x4000,
            actual: 0,
        }]
    );
}

#[test]
fn step_error_stops_the_run() {
    let bytes = fixture_bytes(vec![
        inc_ax_vector("inc ax"),
        inc_ax_vector("inc ax"),
        inc_ax_vector("inc ax"),
    ]);
    let mut calls = 0;
    let mut cpu = MockCpu::new(move |regs, mem| {
        calls += 1;
        if calls == 2 {
            return Err("invalid opcode".to_string());
        }
        inc_ax(regs, mem)
    });

    let err = harness(Variant::I8088)
        .replay("40.bin", Cursor::new(bytes), &mut cpu)
        .unwrap_err();
    match &err {
        Error::Step { index, message, .. } => {
            assert_eq!(*index, 1);
            assert_eq!(message, "invalid opcode");
        }
        other => panic!("expected step error, got {other:?}"),
    }
    assert!(err.is_fatal());
    assert_eq!(cpu.resets, 2);
}

#[test]
fn run_continues_past_failures() {
    let mut wrong = inc_ax_vector("inc ax (bad)");
    wrong.final_regs.ax = 7;
    let bytes = fixture_bytes(vec![
        wrong.clone(),
        inc_ax_vector("inc ax"),
        TestVector {
            name: "inc ax (worse)".to_string(),
            ..wrong
        },
    ]);

    let outcome = harness(Variant::I8088)
        .replay("40.bin", Cursor::new(bytes), &mut MockCpu::new(inc_ax))
        .unwrap();
    assert_eq!(outcome.total, 3);
    assert_eq!(outcome.passed, 1);
    let indices: Vec<usize> = outcome.failures.iter().map(|f| f.index).collect();
    assert_eq!(indices, [0, 2]);

    let text = outcome.into_result().unwrap_err().to_string();
    assert!(text.starts_with("40.bin: 2 of 3 vectors diverged"));
    assert!(text.contains("inc ax (bad)"));
    assert!(text.contains("inc ax (worse)"));
}

#[test]
fn cycle_difference_is_advisory() {
    let mut vector = inc_ax_vector("inc ax");
    vector.cycles = 7;
    let bytes = fixture_bytes(vec![vector]);

    let outcome = harness(Variant::I8088)
        .replay("40.bin", Cursor::new(bytes.clone()), &mut MockCpu::new(inc_ax))
        .unwrap();
    assert!(outcome.is_pass());
    assert_eq!(outcome.timing_advisories, 1);

    let quiet = Harness::new(
        Variant::I8088,
        ReplayOptions {
            report_cycles: false,
        },
    );
    let outcome = quiet
        .replay("40.bin", Cursor::new(bytes), &mut MockCpu::new(inc_ax))
        .unwrap();
    assert_eq!(outcome.timing_advisories, 0);
}

#[test]
fn truncated_fixture_is_structural() {
    let mut bytes = fixture_bytes(vec![inc_ax_vector("inc ax"), inc_ax_vector("inc ax")]);
    bytes.truncate(bytes.len() - 5);

    let err = harness(Variant::I8088)
        .replay("40.bin", Cursor::new(bytes), &mut MockCpu::new(inc_ax))
        .unwrap_err();
    assert!(matches!(err, Error::Structural(_)), "{err}");

    let err = harness(Variant::I8088)
        .replay("40.bin", Cursor::new(vec![1, 0]), &mut MockCpu::new(inc_ax))
        .unwrap_err();
    assert!(matches!(err, Error::Structural(_)), "{err}");
}

#[test]
fn empty_fixture_passes_trivially() {
    let outcome = harness(Variant::V20)
        .replay("0F.bin", Cursor::new(vec![0, 0, 0, 0]), &mut MockCpu::new(inc_ax))
        .unwrap();
    assert_eq!(outcome.total, 0);
    assert!(outcome.is_pass());
}

#[test]
fn replay_file_labels_with_the_file_name() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("40.bin");
    let mut wrong = inc_ax_vector("inc ax");
    wrong.final_regs.ax = 2;
    std::fs::write(&path, fixture_bytes(vec![wrong])).unwrap();

    let outcome = harness(Variant::I8088)
        .replay_file(&path, &mut MockCpu::new(inc_ax))
        .unwrap();
    assert_eq!(outcome.fixture, "40.bin");
    assert_eq!(outcome.failures.len(), 1);
}

proptest! {
    #[test]
    fn flags_pass_iff_masked_bits_agree(
        expected in any::<u16>(),
        actual in any::<u16>(),
        mask in prop_oneof![Just(FLAGS_ALL_DEFINED), Just(0x0FD5u16), Just(FLAG_CF), any::<u16>()],
    ) {
        let mut vector = inc_ax_vector("cmc");
        vector.flags_mask = mask;
        vector.final_regs = vector.initial_regs;
        vector.final_regs.flags = expected;
        vector.cycles = 0;
        let bytes = fixture_bytes(vec![vector]);

        let mut cpu = MockCpu::new(move |regs, _| {
            regs.flags = actual;
            Ok(Step::default())
        });
        let outcome = harness(Variant::I8088)
            .replay("F5.bin", Cursor::new(bytes), &mut cpu)
            .unwrap();
        prop_assert_eq!(outcome.is_pass(), (expected ^ actual) & mask == 0);
    }
}
