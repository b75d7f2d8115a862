//! Fixed layout constants shared by the container decoders.
//!
//! All NCSD/NCCH offset and size fields are expressed in media units and must
//! be scaled by [`MEDIA_UNIT`] before they can be used as byte offsets.

/// Scaling factor for NCSD/NCCH offset and size fields.
pub const MEDIA_UNIT: usize = 0x200;

/// Offset of the 4-byte magic inside both the NCSD and NCCH headers.
pub const MAGIC_OFFSET: usize = 0x100;

/// "NCSD" as a little-endian u32.
pub const NCSD_MAGIC: u32 = 0x4453_434E;
/// "NCCH" as a little-endian u32.
pub const NCCH_MAGIC: u32 = 0x4843_434E;
/// "IVFC" as a little-endian u32.
pub const IVFC_MAGIC: u32 = 0x4346_5649;
/// Fixed constant following the IVFC magic in a RomFS header.
pub const IVFC_MAGIC_NUM: u32 = 0x10000;

/// The all-ones offset that marks "no relation" in a metadata record's
/// parent/sibling/child/first-file link fields. Never a valid table offset.
pub const SENTINEL: u32 = u32::MAX;

/// Offset of the cart header relative to the NCSD base.
pub const CART_HEADER_OFFSET: usize = 0x160;

/// Offset of the extended header relative to the NCCH base.
pub const EXHEADER_OFFSET: usize = 0x200;
/// Offset of the first AccessControlInfo block relative to the exheader base.
pub const ACI_OFFSET: usize = 0x200;
/// Offset of the second ("limits") AccessControlInfo block.
pub const ACI_LIMITS_OFFSET: usize = 0x600;

/// On-disk footprint of the ExeFS header, fixed regardless of how many of the
/// ten slots are used. File data offsets are relative to its end.
pub const EXEFS_HEADER_LEN: usize = 0x200;

/// Offset of the Level3 region relative to the RomFS base. Levels 1 and 2
/// (block hashes) sit in between and are not interpreted.
pub const LEVEL3_OFFSET: usize = 0x1000;

/// Fixed part of a directory metadata record, before the name.
pub const DIR_RECORD_LEN: usize = 0x18;
/// Fixed part of a file metadata record, before the name.
pub const FILE_RECORD_LEN: usize = 0x20;

/// Maximum directory nesting accepted by the tree builder. The format has no
/// authoritative depth field, so a malformed image could otherwise drive the
/// reconstruction arbitrarily deep.
pub const MAX_TREE_DEPTH: usize = 256;

/// Rounds an offset up to the next multiple of 4. Metadata records are packed
/// but each starts on a 4-byte boundary.
#[inline]
pub fn align4(offset: usize) -> usize {
    (offset + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::align4;

    #[test]
    fn align4_rounds_up() {
        assert_eq!(align4(0), 0);
        assert_eq!(align4(1), 4);
        assert_eq!(align4(4), 4);
        assert_eq!(align4(0x19), 0x1C);
        assert_eq!(align4(0x1E), 0x20);
    }
}
