//! Decoder for the ExeFS archive embedded in an NCCH partition.
//!
//! An ExeFS holds up to ten named sections (executable code, icon data and
//! the like) in fixed header slots. A slot whose size field is zero is
//! absent. File data begins `0x200` bytes after the ExeFS base, past the
//! header's fixed on-disk footprint, and each slot's offset is relative to
//! that point.

use crate::{error::ParseError, format::EXEFS_HEADER_LEN, scanner::Scanner};

pub const EXEFS_SLOTS: usize = 10;

/// One of the ten fixed file-header slots.
#[derive(Clone, Debug)]
pub struct ExeFsFileHeader {
    /// Raw 8-byte section name, NUL-padded.
    pub name: [u8; 8],
    /// Offset in bytes, relative to the end of the ExeFS header.
    pub offset: u32,
    /// Size in bytes. Zero marks an unused slot.
    pub size: u32,
}

impl ExeFsFileHeader {
    /// The section name with trailing NUL padding removed.
    pub fn name_str(&self) -> String {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..len]).into_owned()
    }
}

/// A decoded ExeFS: ten header slots, ten hash slots and the extracted
/// contents of every used slot.
#[derive(Clone, Debug)]
pub struct ExeFs {
    pub file_headers: [ExeFsFileHeader; EXEFS_SLOTS],
    /// Per-slot SHA-256 over the file contents. Retained, not verified.
    pub file_hashes: [[u8; 32]; EXEFS_SLOTS],
    /// Extracted bytes for each used slot, `None` where the slot is absent.
    pub file_data: [Option<Vec<u8>>; EXEFS_SLOTS],
}

impl ExeFs {
    /// Decodes an ExeFS at `offset` inside `data`.
    pub fn parse(data: &[u8], offset: usize) -> Result<Self, ParseError> {
        let mut scanner = Scanner::new(data);
        scanner.seek(offset);

        let mut headers = Vec::with_capacity(EXEFS_SLOTS);
        for _ in 0..EXEFS_SLOTS {
            headers.push(ExeFsFileHeader {
                name: scanner.read_array()?,
                offset: scanner.read_u32()?,
                size: scanner.read_u32()?,
            });
        }
        let file_headers: [ExeFsFileHeader; EXEFS_SLOTS] = headers.try_into().unwrap();

        let mut file_hashes = [[0u8; 32]; EXEFS_SLOTS];
        for hash in file_hashes.iter_mut() {
            *hash = scanner.read_array()?;
        }

        let mut file_data: [Option<Vec<u8>>; EXEFS_SLOTS] = Default::default();
        for (slot, header) in file_headers.iter().enumerate() {
            if header.size == 0 {
                continue;
            }

            trace!(
                "ExeFS slot {} ('{}') spans {:#x} bytes at relative offset {:#x}.",
                slot,
                header.name_str(),
                header.size,
                header.offset
            );

            scanner.seek(offset + header.offset as usize + EXEFS_HEADER_LEN);
            file_data[slot] = Some(scanner.read_bytes(header.size as usize)?.to_vec());
        }

        Ok(Self {
            file_headers,
            file_hashes,
            file_data,
        })
    }

    /// Iterates over the used slots as (index, header, data) triples.
    pub fn files(&self) -> impl Iterator<Item = (usize, &ExeFsFileHeader, &[u8])> {
        self.file_headers
            .iter()
            .enumerate()
            .filter_map(|(slot, header)| {
                self.file_data[slot]
                    .as_deref()
                    .map(|data| (slot, header, data))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::{ExeFs, EXEFS_SLOTS};
    use crate::error::ParseError;

    fn exefs_image(slots: &[(&str, u32, &[u8])]) -> Vec<u8> {
        let data_len = slots
            .iter()
            .map(|(_, offset, data)| *offset as usize + data.len())
            .max()
            .unwrap_or(0);
        let mut image = vec![0u8; 0x200 + data_len];

        for (slot, (name, offset, data)) in slots.iter().enumerate() {
            let base = slot * 0x10;
            image[base..base + name.len()].copy_from_slice(name.as_bytes());
            image[base + 8..base + 12].copy_from_slice(&offset.to_le_bytes());
            image[base + 12..base + 16].copy_from_slice(&(data.len() as u32).to_le_bytes());
            let start = 0x200 + *offset as usize;
            image[start..start + data.len()].copy_from_slice(data);
        }

        image
    }

    #[test]
    fn extracts_used_slots_only() {
        let image = exefs_image(&[(".code", 0, b"\xEA\x00\x00\x00"), ("icon", 4, b"SMDH")]);
        let exefs = ExeFs::parse(&image, 0).unwrap();

        assert_eq!(exefs.file_headers[0].name_str(), ".code");
        assert_eq!(exefs.file_data[0].as_deref(), Some(&b"\xEA\x00\x00\x00"[..]));
        assert_eq!(exefs.file_headers[1].name_str(), "icon");
        assert_eq!(exefs.file_data[1].as_deref(), Some(&b"SMDH"[..]));
        for slot in 2..EXEFS_SLOTS {
            assert_eq!(exefs.file_headers[slot].size, 0);
            assert!(exefs.file_data[slot].is_none());
        }

        let listed: Vec<_> = exefs.files().map(|(slot, h, _)| (slot, h.name_str())).collect();
        assert_eq!(listed, [(0, ".code".to_string()), (1, "icon".to_string())]);
    }

    #[test]
    fn data_begins_past_the_header_footprint() {
        let mut image = exefs_image(&[("banner", 0x10, b"ab")]);
        // Plant a decoy at the raw slot offset; the real data must come from
        // offset + 0x200.
        image[0x10] = 0xEE;

        let exefs = ExeFs::parse(&image, 0).unwrap();
        assert_eq!(exefs.file_data[0].as_deref(), Some(&b"ab"[..]));
    }

    #[test]
    fn slot_past_the_end_is_an_underrun() {
        let mut image = exefs_image(&[]);
        // Slot 0 claims 0x100 bytes that the buffer does not have.
        image[12..16].copy_from_slice(&0x100u32.to_le_bytes());

        assert!(matches!(
            ExeFs::parse(&image, 0),
            Err(ParseError::BufferUnderrun { .. })
        ));
    }
}
