//! Provides the [`Scanner`] structure, a bounds-checked cursor over an
//! in-memory image.
//!
//! Every container decoder in this crate reads through a `Scanner`. The whole
//! input is untrusted (cartridge dumps can be corrupted or deliberately
//! malformed), so each read verifies that it stays inside the buffer and
//! fails with [`ParseError::BufferUnderrun`] otherwise.

use crate::error::ParseError;

/// A position-tracking reader over an immutable byte buffer.
///
/// All multi-byte integers are read little-endian. The position may be moved
/// past the end of the buffer with [`seek`](Scanner::seek) or
/// [`skip`](Scanner::skip); the bounds check happens on the next read.
#[derive(Clone, Debug)]
pub struct Scanner<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Returns the current read position.
    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Sets the absolute read position.
    #[inline]
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Advances the read position by `count` bytes.
    #[inline]
    pub fn skip(&mut self, count: usize) {
        self.pos = self.pos.saturating_add(count);
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], ParseError> {
        let end = self
            .pos
            .checked_add(count)
            .filter(|&end| end <= self.data.len())
            .ok_or(ParseError::BufferUnderrun {
                position: self.pos,
                requested: count,
                length: self.data.len(),
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Returns the next `count` bytes and advances past them.
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], ParseError> {
        self.take(count)
    }

    /// Reads exactly `N` bytes into a fixed-size array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ParseError> {
        let bytes: &[u8; N] = self.take(N)?.try_into().unwrap();
        Ok(*bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8, ParseError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, ParseError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, ParseError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, ParseError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }
}

#[cfg(test)]
mod tests {
    use super::Scanner;
    use crate::error::ParseError;

    #[test]
    fn reads_little_endian_integers() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0xFF];
        let mut scanner = Scanner::new(&data);

        assert_eq!(scanner.read_u16().unwrap(), 0x0201);
        assert_eq!(scanner.read_u32().unwrap(), 0x06050403);
        assert_eq!(scanner.read_u8().unwrap(), 0x07);
        assert_eq!(scanner.pos(), 7);
    }

    #[test]
    fn seek_and_skip_move_the_cursor() {
        let data = [0u8, 1, 2, 3, 4, 5, 6, 7];
        let mut scanner = Scanner::new(&data);

        scanner.seek(4);
        assert_eq!(scanner.read_u8().unwrap(), 4);
        scanner.skip(2);
        assert_eq!(scanner.read_u8().unwrap(), 7);
    }

    #[test]
    fn read_past_the_end_is_an_underrun() {
        let data = [0u8; 4];
        let mut scanner = Scanner::new(&data);
        scanner.seek(2);

        match scanner.read_u32() {
            Err(ParseError::BufferUnderrun {
                position,
                requested,
                length,
            }) => {
                assert_eq!(position, 2);
                assert_eq!(requested, 4);
                assert_eq!(length, 4);
            }
            other => panic!("expected BufferUnderrun, got {other:?}"),
        }

        // The failed read must not have moved the cursor.
        assert_eq!(scanner.pos(), 2);
        assert_eq!(scanner.read_u16().unwrap(), 0);
    }

    #[test]
    fn seek_past_the_end_fails_on_the_next_read() {
        let data = [0u8; 4];
        let mut scanner = Scanner::new(&data);

        scanner.seek(100);
        assert!(matches!(
            scanner.read_u8(),
            Err(ParseError::BufferUnderrun { position: 100, .. })
        ));

        scanner.seek(usize::MAX);
        scanner.skip(16);
        assert!(scanner.read_u8().is_err());
    }

    #[test]
    fn read_bytes_returns_the_exact_slice() {
        let data = [9u8, 8, 7, 6, 5];
        let mut scanner = Scanner::new(&data);
        scanner.seek(1);

        assert_eq!(scanner.read_bytes(3).unwrap(), &[8, 7, 6]);
        assert_eq!(scanner.read_array::<1>().unwrap(), [5]);
        assert!(scanner.read_bytes(1).is_err());
    }
}
