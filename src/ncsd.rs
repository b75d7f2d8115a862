//! Decoder for the outer NCSD partition table and the top-level [`Image`]
//! entry point.
//!
//! An NCSD image carries up to eight NCCH partitions; a partition-table slot
//! whose size field is zero is absent. Decoding one partition never aborts
//! the others: failures are kept per slot so a damaged partition can be
//! reported and skipped by the caller.

use crate::{
    error::{ParseError, Region},
    format::{CART_HEADER_OFFSET, MEDIA_UNIT, NCCH_MAGIC, NCSD_MAGIC},
    ncch::{magic_at, Ncch},
    scanner::Scanner,
};

pub const PARTITION_SLOTS: usize = 8;

/// One partition-table entry, in media units. A zero size marks an absent
/// slot.
#[derive(Clone, Copy, Debug)]
pub struct PartitionEntry {
    pub offset: u32,
    pub size: u32,
}

/// The fixed NCSD header at offset 0 of an image.
#[derive(Clone, Debug)]
pub struct NcsdHeader {
    pub signature: [u8; 0x100],
    pub magic: u32,
    pub size: u32,
    pub media_id: u64,
    pub fs_type: u64,
    pub crypt_type: u64,
    pub partition_table: [PartitionEntry; PARTITION_SLOTS],
}

impl NcsdHeader {
    pub fn parse(data: &[u8], offset: usize) -> Result<Self, ParseError> {
        let mut scanner = Scanner::new(data);
        scanner.seek(offset);

        let signature = scanner.read_array()?;
        let magic = scanner.read_u32()?;
        let size = scanner.read_u32()?;
        let media_id = scanner.read_u64()?;
        let fs_type = scanner.read_u64()?;
        let crypt_type = scanner.read_u64()?;

        let mut partition_table = [PartitionEntry { offset: 0, size: 0 }; PARTITION_SLOTS];
        for entry in partition_table.iter_mut() {
            entry.offset = scanner.read_u32()?;
            entry.size = scanner.read_u32()?;
        }

        Ok(Self {
            signature,
            magic,
            size,
            media_id,
            fs_type,
            crypt_type,
            partition_table,
        })
    }
}

/// The cart header that follows the NCSD header on cartridge images.
#[derive(Clone, Debug)]
pub struct CartHeader {
    pub exheader_hash: [u8; 0x20],
    pub header_size: u32,
    pub sector_zero_offset: u32,
    pub partition_flags: u64,
    pub partition_id_table: [u64; PARTITION_SLOTS],
}

impl CartHeader {
    pub fn parse(data: &[u8], offset: usize) -> Result<Self, ParseError> {
        let mut scanner = Scanner::new(data);
        scanner.seek(offset);

        let exheader_hash = scanner.read_array()?;
        let header_size = scanner.read_u32()?;
        let sector_zero_offset = scanner.read_u32()?;
        let partition_flags = scanner.read_u64()?;

        let mut partition_id_table = [0u64; PARTITION_SLOTS];
        for id in partition_id_table.iter_mut() {
            *id = scanner.read_u64()?;
        }

        Ok(Self {
            exheader_hash,
            header_size,
            sector_zero_offset,
            partition_flags,
            partition_id_table,
        })
    }
}

/// A decoded NCSD image with its (up to eight) NCCH partitions.
#[derive(Debug)]
pub struct Ncsd {
    pub header: NcsdHeader,
    pub cart_header: CartHeader,
    pub partitions: [Region<Ncch>; PARTITION_SLOTS],
}

impl Ncsd {
    /// Decodes the NCSD container at `offset` inside `data`.
    ///
    /// A magic mismatch here is fatal for the whole image. Partitions decode
    /// independently afterwards.
    pub fn parse(data: &[u8], offset: usize) -> Result<Self, ParseError> {
        let header = NcsdHeader::parse(data, offset)?;

        if header.magic != NCSD_MAGIC {
            return Err(ParseError::MagicMismatch {
                structure: "NCSD",
                expected: NCSD_MAGIC,
                actual: header.magic,
            });
        }

        let cart_header = CartHeader::parse(data, offset + CART_HEADER_OFFSET)?;

        let mut partitions: [Region<Ncch>; PARTITION_SLOTS] =
            std::array::from_fn(|_| Region::Absent);
        for (slot, entry) in header.partition_table.iter().enumerate() {
            // A slot exists exactly when its size field is nonzero.
            if entry.size == 0 {
                continue;
            }

            debug!(
                "Partition {} spans {:#x} media units at {:#x}.",
                slot, entry.size, entry.offset
            );

            let base = offset + entry.offset as usize * MEDIA_UNIT;
            partitions[slot] = Region::from_result(Ncch::parse(data, base));
        }

        Ok(Self {
            header,
            cart_header,
            partitions,
        })
    }
}

/// A parsed cartridge image: either a full NCSD container or a standalone
/// NCCH partition file.
#[derive(Debug)]
pub enum Image {
    Ncsd(Ncsd),
    Ncch(Box<Ncch>),
}

impl Image {
    /// Decodes an image from a flat buffer, sniffing the magic at +0x100 to
    /// tell NCSD containers and bare NCCH partitions apart.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        match magic_at(data, 0)? {
            NCSD_MAGIC => Ncsd::parse(data, 0).map(Image::Ncsd),
            NCCH_MAGIC => Ncch::parse(data, 0).map(Box::new).map(Image::Ncch),
            actual => Err(ParseError::MagicMismatch {
                structure: "image",
                expected: NCSD_MAGIC,
                actual,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Region;

    fn ncsd_image(media_units: usize) -> Vec<u8> {
        let mut image = vec![0u8; media_units * MEDIA_UNIT];
        image[0x100..0x104].copy_from_slice(&NCSD_MAGIC.to_le_bytes());
        image
    }

    fn set_partition(image: &mut [u8], slot: usize, offset: u32, size: u32) {
        let entry = 0x120 + slot * 8;
        image[entry..entry + 4].copy_from_slice(&offset.to_le_bytes());
        image[entry + 4..entry + 8].copy_from_slice(&size.to_le_bytes());
    }

    fn plant_ncch(image: &mut [u8], base: usize) {
        image[base + 0x100..base + 0x104].copy_from_slice(&NCCH_MAGIC.to_le_bytes());
    }

    #[test]
    fn partition_offsets_are_media_unit_scaled() {
        // Slot 0: offset 0x4, size 0x10 -> NCCH at byte 0x800.
        let mut image = ncsd_image(0x14);
        set_partition(&mut image, 0, 0x4, 0x10);
        plant_ncch(&mut image, 0x800);

        let ncsd = Ncsd::parse(&image, 0).unwrap();
        let ncch = ncsd.partitions[0].present().expect("slot 0 should decode");
        assert_eq!(ncch.header.magic, NCCH_MAGIC);
        for slot in 1..PARTITION_SLOTS {
            assert!(ncsd.partitions[slot].is_absent());
        }
    }

    #[test]
    fn zero_sized_slots_are_absent_not_empty() {
        let mut image = ncsd_image(2);
        // Nonzero offset but zero size: still absent.
        set_partition(&mut image, 3, 0x4, 0);

        let ncsd = Ncsd::parse(&image, 0).unwrap();
        assert!(ncsd.partitions[3].is_absent());
    }

    #[test]
    fn one_bad_partition_does_not_abort_the_rest() {
        let mut image = ncsd_image(6);
        set_partition(&mut image, 0, 0x1, 0x1);
        set_partition(&mut image, 1, 0x3, 0x1);
        // Slot 0 has no NCCH magic; slot 1 does.
        plant_ncch(&mut image, 0x600);

        let ncsd = Ncsd::parse(&image, 0).unwrap();
        assert!(matches!(
            ncsd.partitions[0],
            Region::Damaged(ParseError::MagicMismatch { structure: "NCCH", .. })
        ));
        assert!(ncsd.partitions[1].present().is_some());
    }

    #[test]
    fn image_sniffs_ncsd_and_bare_ncch() {
        let image = ncsd_image(2);
        assert!(matches!(Image::parse(&image).unwrap(), Image::Ncsd(_)));

        let mut ncch_only = vec![0u8; MEDIA_UNIT];
        ncch_only[0x100..0x104].copy_from_slice(&NCCH_MAGIC.to_le_bytes());
        assert!(matches!(Image::parse(&ncch_only).unwrap(), Image::Ncch(_)));
    }

    #[test]
    fn unknown_magic_is_rejected() {
        let image = vec![0u8; MEDIA_UNIT];
        assert!(matches!(
            Image::parse(&image),
            Err(ParseError::MagicMismatch { structure: "image", .. })
        ));

        // Too short to even hold the magic.
        assert!(matches!(
            Image::parse(&[0u8; 0x40]),
            Err(ParseError::BufferUnderrun { .. })
        ));
    }
}
