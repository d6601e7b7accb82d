//! Minimal CDR (XCDR1) codec for ROS 2 message payloads.
//!
//! Payloads start with a 4-byte encapsulation header; primitive alignment is
//! measured from the end of that header.

use crate::error::DecodeError;

const HEADER_LEN: usize = 4;
const CDR_BE: u16 = 0x0000;
const CDR_LE: u16 = 0x0001;

/// Cursor over a CDR-encoded payload.
pub struct CdrReader<'a> {
    body: &'a [u8],
    pos: usize,
    little_endian: bool,
}

impl<'a> CdrReader<'a> {
    /// Parses the encapsulation header and positions the cursor on the body.
    pub fn new(data: &'a [u8]) -> Result<Self, DecodeError> {
        if data.len() < HEADER_LEN {
            return Err(DecodeError::Truncated {
                needed: HEADER_LEN,
                offset: 0,
                available: data.len(),
            });
        }

        let kind = u16::from_be_bytes([data[0], data[1]]);
        let little_endian = match kind {
            CDR_LE => true,
            CDR_BE => false,
            other => return Err(DecodeError::UnsupportedEncapsulation(other)),
        };

        Ok(Self {
            body: &data[HEADER_LEN..],
            pos: 0,
            little_endian,
        })
    }

    pub fn is_little_endian(&self) -> bool {
        self.little_endian
    }

    /// Bytes left after the cursor.
    pub fn remaining(&self) -> usize {
        self.body.len().saturating_sub(self.pos)
    }

    fn align(&mut self, n: usize) {
        let rem = self.pos % n;
        if rem != 0 {
            self.pos += n - rem;
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.body.len());
        match end {
            Some(end) => {
                let slice = &self.body[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(DecodeError::Truncated {
                needed: n,
                offset: self.pos,
                available: self.remaining(),
            }),
        }
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        self.align(N);
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take_array::<4>()?;
        Ok(if self.little_endian {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        })
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        let bytes = self.take_array::<4>()?;
        Ok(if self.little_endian {
            i32::from_le_bytes(bytes)
        } else {
            i32::from_be_bytes(bytes)
        })
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        let bytes = self.take_array::<8>()?;
        Ok(if self.little_endian {
            f64::from_le_bytes(bytes)
        } else {
            f64::from_be_bytes(bytes)
        })
    }

    /// Reads a length-prefixed string. The length counts the trailing NUL.
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u32()? as usize;
        if len == 0 {
            return Ok(String::new());
        }
        let raw = self.take(len)?;
        let text = match raw.split_last() {
            Some((0, rest)) => rest,
            _ => raw,
        };
        Ok(String::from_utf8(text.to_vec())?)
    }

    fn read_len(&mut self) -> Result<usize, DecodeError> {
        let len = self.read_u32()? as usize;
        // Every element occupies at least one byte; reject counts the body cannot hold.
        if len > self.remaining() {
            return Err(DecodeError::Truncated {
                needed: len,
                offset: self.pos,
                available: self.remaining(),
            });
        }
        Ok(len)
    }

    /// Reads a `uint8[]` sequence.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_len()?;
        Ok(self.take(len)?.to_vec())
    }

    /// Reads a `string[]` sequence.
    pub fn read_string_seq(&mut self) -> Result<Vec<String>, DecodeError> {
        let len = self.read_len()?;
        (0..len).map(|_| self.read_string()).collect()
    }

    /// Reads a `float64[]` sequence.
    pub fn read_f64_seq(&mut self) -> Result<Vec<f64>, DecodeError> {
        let len = self.read_len()?;
        (0..len).map(|_| self.read_f64()).collect()
    }
}

/// Builder for CDR payloads, used to produce message logs for fixtures and tooling.
pub struct CdrWriter {
    body: Vec<u8>,
    little_endian: bool,
}

impl CdrWriter {
    pub fn new(little_endian: bool) -> Self {
        Self {
            body: Vec::new(),
            little_endian,
        }
    }

    fn align(&mut self, n: usize) {
        let rem = self.body.len() % n;
        if rem != 0 {
            self.body.resize(self.body.len() + n - rem, 0);
        }
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.body.push(value);
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.align(4);
        let bytes = if self.little_endian {
            value.to_le_bytes()
        } else {
            value.to_be_bytes()
        };
        self.body.extend_from_slice(&bytes);
        self
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.align(4);
        let bytes = if self.little_endian {
            value.to_le_bytes()
        } else {
            value.to_be_bytes()
        };
        self.body.extend_from_slice(&bytes);
        self
    }

    pub fn write_f64(&mut self, value: f64) -> &mut Self {
        self.align(8);
        let bytes = if self.little_endian {
            value.to_le_bytes()
        } else {
            value.to_be_bytes()
        };
        self.body.extend_from_slice(&bytes);
        self
    }

    pub fn write_string(&mut self, value: &str) -> &mut Self {
        self.write_u32(value.len() as u32 + 1);
        self.body.extend_from_slice(value.as_bytes());
        self.body.push(0);
        self
    }

    pub fn write_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.write_u32(value.len() as u32);
        self.body.extend_from_slice(value);
        self
    }

    pub fn write_string_seq<S: AsRef<str>>(&mut self, values: &[S]) -> &mut Self {
        self.write_u32(values.len() as u32);
        for v in values {
            self.write_string(v.as_ref());
        }
        self
    }

    pub fn write_f64_seq(&mut self, values: &[f64]) -> &mut Self {
        self.write_u32(values.len() as u32);
        for v in values {
            self.write_f64(*v);
        }
        self
    }

    /// Prepends the encapsulation header and returns the payload.
    pub fn finish(&self) -> Vec<u8> {
        let kind = if self.little_endian { CDR_LE } else { CDR_BE };
        let mut out = Vec::with_capacity(HEADER_LEN + self.body.len());
        out.extend_from_slice(&kind.to_be_bytes());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&self.body);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_selects_endianness() {
        let le = CdrReader::new(&[0x00, 0x01, 0, 0]).unwrap();
        assert!(le.is_little_endian());

        let be = CdrReader::new(&[0x00, 0x00, 0, 0]).unwrap();
        assert!(!be.is_little_endian());

        assert!(matches!(
            CdrReader::new(&[0x00, 0x03, 0, 0]),
            Err(DecodeError::UnsupportedEncapsulation(0x0003))
        ));
        assert!(matches!(
            CdrReader::new(&[0x00]),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_alignment_is_relative_to_body() {
        // u8 followed by f64: the f64 starts at body offset 8, not 4.
        let mut data = vec![0x00, 0x01, 0, 0, 7];
        data.extend_from_slice(&[0; 7]);
        data.extend_from_slice(&1.5f64.to_le_bytes());

        let mut reader = CdrReader::new(&data).unwrap();
        assert_eq!(reader.read_u8().unwrap(), 7);
        assert_eq!(reader.read_f64().unwrap(), 1.5);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_string_strips_nul_terminator() {
        let data = [0x00, 0x01, 0, 0, 4, 0, 0, 0, b'c', b'a', b'm', 0];
        let mut reader = CdrReader::new(&data).unwrap();
        assert_eq!(reader.read_string().unwrap(), "cam");
    }

    #[test]
    fn test_big_endian_writer_matches_reader() {
        let mut w = CdrWriter::new(false);
        w.write_i32(-3).write_string("base").write_f64_seq(&[0.25, -1.0]);
        let payload = w.finish();
        assert_eq!(&payload[..2], &[0x00, 0x00]);

        let mut r = CdrReader::new(&payload).unwrap();
        assert_eq!(r.read_i32().unwrap(), -3);
        assert_eq!(r.read_string().unwrap(), "base");
        assert_eq!(r.read_f64_seq().unwrap(), vec![0.25, -1.0]);
    }

    #[test]
    fn test_oversized_sequence_is_truncation() {
        let data = [0x00, 0x01, 0, 0, 0xff, 0xff, 0, 0, 1, 2];
        let mut reader = CdrReader::new(&data).unwrap();
        assert!(matches!(
            reader.read_bytes(),
            Err(DecodeError::Truncated { .. })
        ));
    }
}
