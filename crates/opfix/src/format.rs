//! Fixture data model and the on-disk record layout.
//!
//! A fixture is a little-endian stream:
//!
//! ```text
//! u32 vector_count
//! vector_count x {
//!     u16 flags_mask
//!     name, NUL terminated
//!     14 x u16 initial registers
//!     u16 mem_count, mem_count x (u32 addr, u8 value)
//!     14 x u16 final registers
//!     u16 mem_count, mem_count x (u32 addr, u8 value)
//!     u16 cycle_count
//!     u8  queue_length
//! }
//! ```
//!
//! Register order is `ax bx cx dx cs ss ds es sp bp si di ip flags`.

use std::fmt;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{Error, Result};
use crate::io::{ReadLeExt, WriteLeExt};

pub const FLAG_CF: u16 = 1 << 0;
pub const FLAG_PF: u16 = 1 << 2;
pub const FLAG_AF: u16 = 1 << 4;
pub const FLAG_ZF: u16 = 1 << 6;
pub const FLAG_SF: u16 = 1 << 7;
pub const FLAG_TF: u16 = 1 << 8;
pub const FLAG_IF: u16 = 1 << 9;
pub const FLAG_DF: u16 = 1 << 10;
pub const FLAG_OF: u16 = 1 << 11;

/// Mask used when the metadata does not name the undefined flags of an opcode.
pub const FLAGS_ALL_DEFINED: u16 = 0xFFFF;

/// Longest vector name, excluding the NUL terminator.
pub const MAX_NAME_LEN: usize = 255;

/// Highest physical address of the 20-bit bus shared by both CPU variants.
pub const MAX_ADDRESS: u32 = 0xF_FFFF;

/// Upper bound on up-front allocation when reading a fixture header.
const MAX_PREALLOC_VECTORS: usize = 16 * 1024;

/// One opcode (optionally narrowed to a ModR/M reg sub-opcode); the unit a fixture covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixtureClass {
    pub opcode: u8,
    pub sub: Option<u8>,
}

impl FixtureClass {
    pub const fn opcode(opcode: u8) -> Self {
        Self { opcode, sub: None }
    }

    pub const fn with_sub(opcode: u8, sub: u8) -> Self {
        Self {
            opcode,
            sub: Some(sub),
        }
    }

    /// `80.3.json.gz` style corpus file name.
    pub fn corpus_file_name(&self) -> String {
        format!("{self}.json.gz")
    }

    pub fn fixture_file_name(&self) -> String {
        format!("{self}.bin")
    }
}

impl fmt::Display for FixtureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sub {
            Some(sub) => write!(f, "{:02X}.{sub}", self.opcode),
            None => write!(f, "{:02X}", self.opcode),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterField {
    Ax,
    Bx,
    Cx,
    Dx,
    Cs,
    Ss,
    Ds,
    Es,
    Sp,
    Bp,
    Si,
    Di,
    Ip,
    Flags,
}

impl RegisterField {
    /// All fields, in fixture order.
    pub const ALL: [RegisterField; 14] = [
        RegisterField::Ax,
        RegisterField::Bx,
        RegisterField::Cx,
        RegisterField::Dx,
        RegisterField::Cs,
        RegisterField::Ss,
        RegisterField::Ds,
        RegisterField::Es,
        RegisterField::Sp,
        RegisterField::Bp,
        RegisterField::Si,
        RegisterField::Di,
        RegisterField::Ip,
        RegisterField::Flags,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RegisterField::Ax => "ax",
            RegisterField::Bx => "bx",
            RegisterField::Cx => "cx",
            RegisterField::Dx => "dx",
            RegisterField::Cs => "cs",
            RegisterField::Ss => "ss",
            RegisterField::Ds => "ds",
            RegisterField::Es => "es",
            RegisterField::Sp => "sp",
            RegisterField::Bp => "bp",
            RegisterField::Si => "si",
            RegisterField::Di => "di",
            RegisterField::Ip => "ip",
            RegisterField::Flags => "flags",
        }
    }
}

impl fmt::Display for RegisterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Registers {
    pub ax: u16,
    pub bx: u16,
    pub cx: u16,
    pub dx: u16,
    pub cs: u16,
    pub ss: u16,
    pub ds: u16,
    pub es: u16,
    pub sp: u16,
    pub bp: u16,
    pub si: u16,
    pub di: u16,
    pub ip: u16,
    pub flags: u16,
}

impl Registers {
    pub fn get(&self, field: RegisterField) -> u16 {
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

    pub fn set(&mut self, field: RegisterField, value: u16) {
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
        *slot = value;
    }

    pub fn encode<W: Write>(&self, w: &mut W) -> Result<()> {
        for field in RegisterField::ALL {
            w.write_u16_le(self.get(field))?;
        }
        Ok(())
    }

    pub fn decode<R: Read>(r: &mut R) -> Result<Self> {
        let mut regs = Registers::default();
        for field in RegisterField::ALL {
            regs.set(field, r.read_u16_le()?);
        }
        Ok(regs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryWrite {
    pub addr: u32,
    pub value: u8,
}

impl MemoryWrite {
    pub const fn new(addr: u32, value: u8) -> Self {
        Self { addr, value }
    }
}

fn encode_memory<W: Write>(w: &mut W, writes: &[MemoryWrite]) -> Result<()> {
    let count: u16 = writes
        .len()
        .try_into()
        .map_err(|_| Error::Structural("too many memory writes in one vector"))?;
    w.write_u16_le(count)?;
    for mem in writes {
        if mem.addr > MAX_ADDRESS {
            return Err(Error::Structural("memory address outside the addressable range"));
        }
        w.write_u32_le(mem.addr)?;
        w.write_u8(mem.value)?;
    }
    Ok(())
}

fn decode_memory<R: Read>(r: &mut R) -> Result<Vec<MemoryWrite>> {
    let count = usize::from(r.read_u16_le()?);
    let mut writes = Vec::with_capacity(count);
    for _ in 0..count {
        let addr = r.read_u32_le()?;
        let value = r.read_u8()?;
        if addr > MAX_ADDRESS {
            return Err(Error::Structural("memory address outside the addressable range"));
        }
        writes.push(MemoryWrite { addr, value });
    }
    Ok(writes)
}

/// One concrete instruction execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestVector {
    pub name: String,
    /// Flag bits that are architecturally defined for this instruction and must match.
    pub flags_mask: u16,
    pub initial_regs: Registers,
    pub initial_ram: Vec<MemoryWrite>,
    pub final_regs: Registers,
    pub final_ram: Vec<MemoryWrite>,
    pub cycles: u16,
    /// Length of the instruction queue when the instruction retired.
    pub queue_len: u8,
}

impl TestVector {
    pub fn encode<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u16_le(self.flags_mask)?;
        w.write_cstr(&self.name)?;
        self.initial_regs.encode(w)?;
        encode_memory(w, &self.initial_ram)?;
        self.final_regs.encode(w)?;
        encode_memory(w, &self.final_ram)?;
        w.write_u16_le(self.cycles)?;
        w.write_u8(self.queue_len)?;
        Ok(())
    }

    pub fn decode<R: Read>(r: &mut R) -> Result<Self> {
        let flags_mask = r.read_u16_le()?;
        let name = r.read_cstr()?;
        let initial_regs = Registers::decode(r)?;
        let initial_ram = decode_memory(r)?;
        let final_regs = Registers::decode(r)?;
        let final_ram = decode_memory(r)?;
        let cycles = r.read_u16_le()?;
        let queue_len = r.read_u8()?;
        Ok(Self {
            name,
            flags_mask,
            initial_regs,
            initial_ram,
            final_regs,
            final_ram,
            cycles,
            queue_len,
        })
    }
}

/// Streams vectors into a fixture, patching the leading count once it is known.
pub struct FixtureWriter<'a, W: Write + Seek> {
    w: &'a mut W,
    header_pos: u64,
    count: u32,
}

impl<'a, W: Write + Seek> FixtureWriter<'a, W> {
    pub fn new(w: &'a mut W) -> Result<Self> {
        let header_pos = w.stream_position()?;
        w.write_u32_le(0)?; // placeholder count
        Ok(Self {
            w,
            header_pos,
            count: 0,
        })
    }

    pub fn push(&mut self, vector: &TestVector) -> Result<()> {
        self.count = self
            .count
            .checked_add(1)
            .ok_or(Error::Structural("too many vectors in one fixture"))?;
        vector.encode(self.w)
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Patches the vector count and leaves the stream positioned after the last record.
    pub fn finish(self) -> Result<u32> {
        let end = self.w.stream_position()?;
        self.w.seek(SeekFrom::Start(self.header_pos))?;
        self.w.write_u32_le(self.count)?;
        self.w.seek(SeekFrom::Start(end))?;
        self.w.flush()?;
        Ok(self.count)
    }
}

/// Reads a fixture one vector at a time.
pub struct FixtureReader<R: Read> {
    r: R,
    declared: u32,
    read: u32,
}

impl<R: Read> FixtureReader<R> {
    pub fn new(mut r: R) -> Result<Self> {
        let declared = r.read_u32_le().map_err(truncated)?;
        Ok(Self {
            r,
            declared,
            read: 0,
        })
    }

    pub fn declared_count(&self) -> u32 {
        self.declared
    }

    /// Next vector, or `None` once the declared count has been consumed and the stream is
    /// confirmed to end there.
    pub fn next_vector(&mut self) -> Result<Option<TestVector>> {
        if self.read == self.declared {
            self.expect_end()?;
            return Ok(None);
        }
        let vector = TestVector::decode(&mut self.r).map_err(truncated)?;
        self.read += 1;
        Ok(Some(vector))
    }

    fn expect_end(&mut self) -> Result<()> {
        let mut next = [0u8; 1];
        loop {
            match self.r.read(&mut next) {
                Ok(0) => return Ok(()),
                Ok(_) => return Err(Error::Structural("trailing bytes after the last vector")),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn truncated(err: Error) -> Error {
    match err {
        Error::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Error::Structural("fixture ends before its declared vector count")
        }
        other => other,
    }
}

/// A fully decoded fixture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fixture {
    pub vectors: Vec<TestVector>,
}

impl Fixture {
    pub fn encode<W: Write + Seek>(&self, w: &mut W) -> Result<()> {
        let mut writer = FixtureWriter::new(w)?;
        for vector in &self.vectors {
            writer.push(vector)?;
        }
        writer.finish()?;
        Ok(())
    }

    pub fn decode<R: Read>(r: R) -> Result<Self> {
        let mut reader = FixtureReader::new(r)?;
        let declared = reader.declared_count() as usize;
        let mut vectors = Vec::with_capacity(declared.min(MAX_PREALLOC_VECTORS));
        while let Some(vector) = reader.next_vector()? {
            vectors.push(vector);
        }
        Ok(Self { vectors })
    }
}
