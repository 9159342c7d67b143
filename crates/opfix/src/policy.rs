//! CPU variants and the quirk/skip tables that decide which vector classes are tested.
//!
//! The policy is purely exclusionary: it never changes what a vector expects, only whether
//! the vector is encoded at all.

use std::fmt;
use std::str::FromStr;

use crate::format::FixtureClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// Baseline 8-bit-bus CPU.
    I8088,
    /// Extended-instruction-set variant (80186 additions).
    V20,
}

impl Variant {
    pub fn name(self) -> &'static str {
        match self {
            Variant::I8088 => "8088",
            Variant::V20 => "v20",
        }
    }

    /// Opcodes the extended variant adds on top of the baseline instruction set.
    pub fn extension_opcodes(self) -> &'static [u8] {
        match self {
            Variant::I8088 => &[],
            Variant::V20 => &[
                0x60, 0x61, 0x62, 0x68, 0x69, 0x6A, 0x6B, 0x6C, 0x6D, 0x6E, 0x6F, 0xC0, 0xC1,
                0xC8, 0xC9,
            ],
        }
    }

    /// Instruction prefix bytes, used to find the opcode inside a vector's instruction bytes.
    pub fn prefix_bytes(self) -> &'static [u8] {
        match self {
            Variant::I8088 => &[0x26, 0x2E, 0x36, 0x3E, 0xF0, 0xF1, 0xF2, 0xF3],
            Variant::V20 => &[0x26, 0x2E, 0x36, 0x3E, 0x64, 0x65, 0xF0, 0xF1, 0xF2, 0xF3],
        }
    }

    /// Whether final register records may omit unchanged registers.
    pub fn final_regs_may_be_partial(self) -> bool {
        matches!(self, Variant::V20)
    }

    /// Whether the harness seeds interrupt vector zero before each vector.
    pub fn seeds_divide_vector(self) -> bool {
        matches!(self, Variant::I8088)
    }

    /// Whether the harness skips vectors carrying the conditional-repeat prefixes.
    pub fn skips_conditional_repeat(self) -> bool {
        matches!(self, Variant::V20)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "8088" | "i8088" => Ok(Variant::I8088),
            "v20" | "nec-v20" => Ok(Variant::V20),
            other => Err(format!("unknown cpu variant {other:?} (expected 8088 or v20)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipRule {
    /// Excludes the opcode and every sub-opcode under it.
    Opcode(u8),
    SubOpcode(u8, u8),
}

impl SkipRule {
    pub fn matches(self, opcode: u8, sub: Option<u8>) -> bool {
        match self {
            SkipRule::Opcode(op) => op == opcode,
            SkipRule::SubOpcode(op, s) => op == opcode && sub == Some(s),
        }
    }
}

impl fmt::Display for SkipRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipRule::Opcode(op) => write!(f, "{op:02X}"),
            SkipRule::SubOpcode(op, sub) => write!(f, "{op:02X}.{sub}"),
        }
    }
}

impl FromStr for SkipRule {
    type Err = String;

    /// `XX` or `XX.N`, opcode in hex.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (op, sub) = match s.split_once('.') {
            Some((op, sub)) => (op, Some(sub)),
            None => (s, None),
        };
        let op = u8::from_str_radix(op, 16).map_err(|_| format!("invalid opcode in rule {s:?}"))?;
        match sub {
            None => Ok(SkipRule::Opcode(op)),
            Some(sub) => match sub.parse::<u8>() {
                Ok(sub) if sub < 8 => Ok(SkipRule::SubOpcode(op, sub)),
                _ => Err(format!("invalid sub-opcode in rule {s:?}")),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    Prefix,
    WaitHalt,
    FloatingPoint,
    Undefined,
    /// The corpus for this class is known to be wrong for a subset of its vectors.
    CorpusDefect,
    /// Not part of this variant's instruction set.
    Inapplicable,
    /// Added at run time by configuration.
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipEntry {
    pub rule: SkipRule,
    pub reason: SkipReason,
}

const fn op(opcode: u8, reason: SkipReason) -> SkipEntry {
    SkipEntry {
        rule: SkipRule::Opcode(opcode),
        reason,
    }
}

const fn sub(opcode: u8, sub: u8, reason: SkipReason) -> SkipEntry {
    SkipEntry {
        rule: SkipRule::SubOpcode(opcode, sub),
        reason,
    }
}

use SkipReason::*;

const I8088_RULES: &[SkipEntry] = &[
    op(0x26, Prefix),
    op(0x2E, Prefix),
    op(0x36, Prefix),
    op(0x3E, Prefix),
    op(0xF0, Prefix),
    op(0xF1, Prefix),
    op(0xF2, Prefix),
    op(0xF3, Prefix),
    op(0x9B, WaitHalt),
    op(0xF4, WaitHalt),
    op(0xD8, FloatingPoint),
    op(0xD9, FloatingPoint),
    op(0xDA, FloatingPoint),
    op(0xDB, FloatingPoint),
    op(0xDC, FloatingPoint),
    op(0xDD, FloatingPoint),
    op(0xDE, FloatingPoint),
    op(0xDF, FloatingPoint),
    op(0xD6, Undefined),
    // A preceding REP flips the sign of the IDIV quotient in roughly a tenth of the vectors.
    sub(0xF6, 7, CorpusDefect),
    sub(0xF7, 7, CorpusDefect),
];

const V20_RULES: &[SkipEntry] = &[
    op(0x26, Prefix),
    op(0x2E, Prefix),
    op(0x36, Prefix),
    op(0x3E, Prefix),
    op(0x64, Prefix),
    op(0x65, Prefix),
    op(0xF0, Prefix),
    op(0xF1, Prefix),
    op(0xF2, Prefix),
    op(0xF3, Prefix),
    op(0x9B, WaitHalt),
    op(0xF4, WaitHalt),
    op(0xD8, FloatingPoint),
    op(0xD9, FloatingPoint),
    op(0xDA, FloatingPoint),
    op(0xDB, FloatingPoint),
    op(0xDC, FloatingPoint),
    op(0xDD, FloatingPoint),
    op(0xDE, FloatingPoint),
    op(0xDF, FloatingPoint),
    op(0x0F, Undefined),
    op(0x63, Undefined),
    op(0x66, Undefined),
    op(0x67, Undefined),
    op(0xD6, Undefined),
    sub(0xFE, 2, Inapplicable),
    sub(0xFE, 3, Inapplicable),
    sub(0xFE, 4, Inapplicable),
    sub(0xFE, 5, Inapplicable),
    sub(0xFE, 6, Inapplicable),
    sub(0xFE, 7, Inapplicable),
];

/// Exclusion table for one CPU variant. Immutable once built.
#[derive(Debug, Clone)]
pub struct SkipPolicy {
    variant: Variant,
    entries: Vec<SkipEntry>,
}

impl SkipPolicy {
    pub fn builtin(variant: Variant) -> Self {
        let table = match variant {
            Variant::I8088 => I8088_RULES,
            Variant::V20 => V20_RULES,
        };
        Self {
            variant,
            entries: table.to_vec(),
        }
    }

    pub fn with_rules(mut self, rules: impl IntoIterator<Item = SkipRule>) -> Self {
        self.entries.extend(rules.into_iter().map(|rule| SkipEntry {
            rule,
            reason: SkipReason::User,
        }));
        self
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn entries(&self) -> &[SkipEntry] {
        &self.entries
    }

    /// The first entry excluding `(opcode, sub)`, if any.
    pub fn exclusion(&self, opcode: u8, sub: Option<u8>) -> Option<&SkipEntry> {
        self.entries.iter().find(|e| e.rule.matches(opcode, sub))
    }

    pub fn is_eligible(&self, opcode: u8, sub: Option<u8>) -> bool {
        self.exclusion(opcode, sub).is_none()
    }

    pub fn admits(&self, class: FixtureClass) -> bool {
        self.is_eligible(class.opcode, class.sub)
    }

    /// Sub-opcode (ModR/M reg field) of the instruction in `bytes`, skipping this variant's
    /// prefixes. `None` when the bytes do not reach a ModR/M byte.
    pub fn sub_opcode_of(&self, bytes: &[u8]) -> Option<(u8, u8)> {
        let prefixes = self.variant.prefix_bytes();
        let pos = bytes.iter().position(|b| !prefixes.contains(b))?;
        let opcode = bytes[pos];
        let modrm = *bytes.get(pos + 1)?;
        Some((opcode, (modrm >> 3) & 7))
    }
}
