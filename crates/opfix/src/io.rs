use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::format::MAX_NAME_LEN;

pub trait WriteLeExt: Write {
    fn write_u8(&mut self, v: u8) -> Result<()> {
        self.write_all(&[v])?;
        Ok(())
    }

    fn write_u16_le(&mut self, v: u16) -> Result<()> {
        self.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    fn write_u32_le(&mut self, v: u32) -> Result<()> {
        self.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    /// Writes `s` followed by a NUL byte. The caller guarantees `s` holds no NUL and fits
    /// [`MAX_NAME_LEN`].
    fn write_cstr(&mut self, s: &str) -> Result<()> {
        if s.len() > MAX_NAME_LEN || s.as_bytes().contains(&0) {
            return Err(Error::Structural("vector name does not fit the fixture format"));
        }
        self.write_all(s.as_bytes())?;
        self.write_all(&[0])?;
        Ok(())
    }
}

impl<T: Write + ?Sized> WriteLeExt for T {}

pub trait ReadLeExt: Read {
    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_u16_le(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Reads a NUL-terminated name of at most [`MAX_NAME_LEN`] bytes.
    fn read_cstr(&mut self) -> Result<String> {
        let mut bytes = Vec::with_capacity(32);
        loop {
            let b = self.read_u8()?;
            if b == 0 {
                break;
            }
            if bytes.len() == MAX_NAME_LEN {
                return Err(Error::Structural("unterminated vector name"));
            }
            bytes.push(b);
        }
        String::from_utf8(bytes).map_err(|_| Error::Structural("vector name is not utf-8"))
    }
}

impl<T: Read + ?Sized> ReadLeExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn cstr_stops_at_nul() {
        let mut cursor = Cursor::new(b"add al,12h\0rest".to_vec());
        assert_eq!(cursor.read_cstr().unwrap(), "add al,12h");
        assert_eq!(cursor.position(), 11);
    }

    #[test]
    fn cstr_without_terminator_is_rejected() {
        let mut cursor = Cursor::new(vec![b'a'; MAX_NAME_LEN + 1]);
        let err = cursor.read_cstr().unwrap_err();
        assert!(matches!(err, Error::Structural(_)));
    }

    #[test]
    fn truncated_cstr_is_an_io_error() {
        let mut cursor = Cursor::new(b"nop".to_vec());
        assert!(matches!(cursor.read_cstr().unwrap_err(), Error::Io(_)));
    }

    #[test]
    fn write_cstr_rejects_embedded_nul() {
        let mut out = Vec::new();
        assert!(out.write_cstr("a\0b").is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn little_endian_words() {
        let mut out = Vec::new();
        out.write_u16_le(0x1234).unwrap();
        out.write_u32_le(0xdead_beef).unwrap();
        assert_eq!(out, [0x34, 0x12, 0xef, 0xbe, 0xad, 0xde]);

        let mut cursor = Cursor::new(out);
        assert_eq!(cursor.read_u16_le().unwrap(), 0x1234);
        assert_eq!(cursor.read_u32_le().unwrap(), 0xdead_beef);
    }
}
