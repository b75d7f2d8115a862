//! Decoder for NCCH content containers.
//!
//! An NCCH holds up to five optional regions: extended header, plain region,
//! logo, ExeFS and RomFS. Each is present exactly when its size field in the
//! NCCH header is nonzero, and each decodes independently of the others, so
//! one damaged region does not take its siblings down with it.

use crate::{
    error::{ParseError, Region},
    exefs::ExeFs,
    format::{ACI_LIMITS_OFFSET, ACI_OFFSET, EXHEADER_OFFSET, MAGIC_OFFSET, MEDIA_UNIT, NCCH_MAGIC},
    romfs::RomFs,
    scanner::Scanner,
};

/// The fixed 0x200-byte NCCH header. Offset and size fields for the plain,
/// logo, ExeFS and RomFS regions are in media units. Signature and hash
/// fields are retained as opaque blobs, not verified.
#[derive(Clone, Debug)]
pub struct NcchHeader {
    pub signature: [u8; 0x100],
    pub magic: u32,
    pub size: u32,
    pub partition_id: u64,
    pub maker_code: u16,
    pub version: u16,
    pub some_hash: u32,
    pub program_id: u64,
    pub logo_hash: [u8; 0x20],
    pub product_code: [u8; 0x10],
    pub exheader_hash: [u8; 0x20],
    pub exheader_size: u32,
    pub flags: [u8; 8],
    pub plain_offset: u32,
    pub plain_size: u32,
    pub logo_offset: u32,
    pub logo_size: u32,
    pub exefs_offset: u32,
    pub exefs_size: u32,
    pub exefs_hash_size: u32,
    pub romfs_offset: u32,
    pub romfs_size: u32,
    pub romfs_hash_size: u32,
    pub exefs_super_hash: [u8; 0x20],
    pub romfs_super_hash: [u8; 0x20],
}

impl NcchHeader {
    pub fn parse(data: &[u8], offset: usize) -> Result<Self, ParseError> {
        let mut scanner = Scanner::new(data);
        scanner.seek(offset);

        let signature = scanner.read_array()?;
        let magic = scanner.read_u32()?;
        let size = scanner.read_u32()?;
        let partition_id = scanner.read_u64()?;
        let maker_code = scanner.read_u16()?;
        let version = scanner.read_u16()?;
        let some_hash = scanner.read_u32()?;
        let program_id = scanner.read_u64()?;
        scanner.skip(0x10);
        let logo_hash = scanner.read_array()?;
        let product_code = scanner.read_array()?;
        let exheader_hash = scanner.read_array()?;
        let exheader_size = scanner.read_u32()?;
        scanner.skip(4);
        let flags = scanner.read_array()?;
        let plain_offset = scanner.read_u32()?;
        let plain_size = scanner.read_u32()?;
        let logo_offset = scanner.read_u32()?;
        let logo_size = scanner.read_u32()?;
        let exefs_offset = scanner.read_u32()?;
        let exefs_size = scanner.read_u32()?;
        let exefs_hash_size = scanner.read_u32()?;
        scanner.skip(4);
        let romfs_offset = scanner.read_u32()?;
        let romfs_size = scanner.read_u32()?;
        let romfs_hash_size = scanner.read_u32()?;
        scanner.skip(4);
        let exefs_super_hash = scanner.read_array()?;
        let romfs_super_hash = scanner.read_array()?;

        Ok(Self {
            signature,
            magic,
            size,
            partition_id,
            maker_code,
            version,
            some_hash,
            program_id,
            logo_hash,
            product_code,
            exheader_hash,
            exheader_size,
            flags,
            plain_offset,
            plain_size,
            logo_offset,
            logo_size,
            exefs_offset,
            exefs_size,
            exefs_hash_size,
            romfs_offset,
            romfs_size,
            romfs_hash_size,
            exefs_super_hash,
            romfs_super_hash,
        })
    }

    /// The product code with trailing NUL padding removed.
    pub fn product_code_str(&self) -> String {
        let len = self
            .product_code
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.product_code.len());
        String::from_utf8_lossy(&self.product_code[..len]).into_owned()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CodeSetInfo {
    pub address: u32,
    pub region_size: u32,
    pub size: u32,
}

impl CodeSetInfo {
    fn parse(scanner: &mut Scanner) -> Result<Self, ParseError> {
        Ok(Self {
            address: scanner.read_u32()?,
            region_size: scanner.read_u32()?,
            size: scanner.read_u32()?,
        })
    }
}

/// Code-segment layout, dependency list and save-data size of a title.
#[derive(Clone, Debug)]
pub struct SystemControlInfo {
    pub app_title: [u8; 8],
    pub flag: u8,
    pub remaster_version: u16,
    pub text_info: CodeSetInfo,
    pub stack_size: u32,
    pub ro_info: CodeSetInfo,
    pub data_info: CodeSetInfo,
    pub bss_size: u32,
    pub dependency_list: [u32; 0x30],
    pub savedata_size: u64,
    pub jump_id: u64,
}

impl SystemControlInfo {
    pub fn parse(data: &[u8], offset: usize) -> Result<Self, ParseError> {
        let mut scanner = Scanner::new(data);
        scanner.seek(offset);

        let app_title = scanner.read_array()?;
        scanner.skip(5);
        let flag = scanner.read_u8()?;
        let remaster_version = scanner.read_u16()?;
        let text_info = CodeSetInfo::parse(&mut scanner)?;
        let stack_size = scanner.read_u32()?;
        let ro_info = CodeSetInfo::parse(&mut scanner)?;
        scanner.skip(4);
        let data_info = CodeSetInfo::parse(&mut scanner)?;
        let bss_size = scanner.read_u32()?;

        let mut dependency_list = [0u32; 0x30];
        for entry in dependency_list.iter_mut() {
            *entry = scanner.read_u32()?;
        }

        let savedata_size = scanner.read_u64()?;
        let jump_id = scanner.read_u64()?;

        Ok(Self {
            app_title,
            flag,
            remaster_version,
            text_info,
            stack_size,
            ro_info,
            data_info,
            bss_size,
            dependency_list,
            savedata_size,
            jump_id,
        })
    }
}

/// Capability/permission descriptors. Parsed as an opaque fixed layout; the
/// ARM9/ARM11 descriptor words are stored raw, never interpreted.
#[derive(Clone, Debug)]
pub struct AccessControlInfo {
    pub program_id: u64,
    pub core_version: u32,
    pub flag1: u8,
    pub flag2: u8,
    pub flag0: u8,
    pub priority: u8,
    pub resource_limits: [u16; 0x10],
    pub extdata_id: u64,
    pub sys_savedata_ids: u64,
    pub storage_unique_ids: u64,
    pub fs_access_and_other: u64,
    pub service_access_control: [[u8; 8]; 0x20],
    pub extended_service_access_control: [[u8; 8]; 2],
    pub resource_limit_category: u8,
    pub arm11_descriptors: [u32; 0x1C],
    pub arm9_descriptors: [u8; 0xF],
    pub arm9_descriptor_version: u8,
}

impl AccessControlInfo {
    pub fn parse(data: &[u8], offset: usize) -> Result<Self, ParseError> {
        let mut scanner = Scanner::new(data);
        scanner.seek(offset);

        let program_id = scanner.read_u64()?;
        let core_version = scanner.read_u32()?;
        let flag1 = scanner.read_u8()?;
        let flag2 = scanner.read_u8()?;
        let flag0 = scanner.read_u8()?;
        let priority = scanner.read_u8()?;

        let mut resource_limits = [0u16; 0x10];
        for limit in resource_limits.iter_mut() {
            *limit = scanner.read_u16()?;
        }

        let extdata_id = scanner.read_u64()?;
        let sys_savedata_ids = scanner.read_u64()?;
        let storage_unique_ids = scanner.read_u64()?;
        let fs_access_and_other = scanner.read_u64()?;

        let mut service_access_control = [[0u8; 8]; 0x20];
        for entry in service_access_control.iter_mut() {
            *entry = scanner.read_array()?;
        }
        let mut extended_service_access_control = [[0u8; 8]; 2];
        for entry in extended_service_access_control.iter_mut() {
            *entry = scanner.read_array()?;
        }

        scanner.skip(0xF);
        let resource_limit_category = scanner.read_u8()?;

        let mut arm11_descriptors = [0u32; 0x1C];
        for descriptor in arm11_descriptors.iter_mut() {
            *descriptor = scanner.read_u32()?;
        }

        scanner.skip(0x10);
        let arm9_descriptors = scanner.read_array()?;
        let arm9_descriptor_version = scanner.read_u8()?;

        Ok(Self {
            program_id,
            core_version,
            flag1,
            flag2,
            flag0,
            priority,
            resource_limits,
            extdata_id,
            sys_savedata_ids,
            storage_unique_ids,
            fs_access_and_other,
            service_access_control,
            extended_service_access_control,
            resource_limit_category,
            arm11_descriptors,
            arm9_descriptors,
            arm9_descriptor_version,
        })
    }
}

/// The extended header: system control info at the exheader base, the first
/// access control block at +0x200, the accessdesc signature/public key, and
/// the second ("limits") access control block at +0x600.
#[derive(Clone, Debug)]
pub struct ExtendedHeader {
    pub sci: SystemControlInfo,
    pub aci: AccessControlInfo,
    pub signature: [u8; 0x100],
    pub public_key: [u8; 0x100],
    pub aci_limits: AccessControlInfo,
}

impl ExtendedHeader {
    pub fn parse(data: &[u8], offset: usize) -> Result<Self, ParseError> {
        let sci = SystemControlInfo::parse(data, offset)?;
        let aci = AccessControlInfo::parse(data, offset + ACI_OFFSET)?;

        let mut scanner = Scanner::new(data);
        scanner.seek(offset + 0x400);
        let signature = scanner.read_array()?;
        let public_key = scanner.read_array()?;

        let aci_limits = AccessControlInfo::parse(data, offset + ACI_LIMITS_OFFSET)?;

        Ok(Self {
            sci,
            aci,
            signature,
            public_key,
            aci_limits,
        })
    }
}

/// A decoded NCCH partition.
#[derive(Debug)]
pub struct Ncch {
    pub header: NcchHeader,
    pub exheader: Region<ExtendedHeader>,
    pub logo: Region<Vec<u8>>,
    pub plain_region: Region<Vec<u8>>,
    pub exefs: Region<ExeFs>,
    pub romfs: Region<RomFs>,
}

impl Ncch {
    /// Decodes the NCCH partition at `offset` inside `data`.
    ///
    /// A magic mismatch or a short header is fatal for the partition. The
    /// five optional regions then decode independently; failures are kept
    /// per region as [`Region::Damaged`].
    pub fn parse(data: &[u8], offset: usize) -> Result<Self, ParseError> {
        let header = NcchHeader::parse(data, offset)?;

        if header.magic != NCCH_MAGIC {
            return Err(ParseError::MagicMismatch {
                structure: "NCCH",
                expected: NCCH_MAGIC,
                actual: header.magic,
            });
        }

        let exheader = if header.exheader_size > 0 {
            Region::from_result(ExtendedHeader::parse(data, offset + EXHEADER_OFFSET))
        } else {
            Region::Absent
        };

        let logo = read_region(data, offset, header.logo_offset, header.logo_size);
        let plain_region = read_region(data, offset, header.plain_offset, header.plain_size);

        let exefs = if header.exefs_size > 0 {
            Region::from_result(ExeFs::parse(
                data,
                offset + header.exefs_offset as usize * MEDIA_UNIT,
            ))
        } else {
            Region::Absent
        };

        let romfs = if header.romfs_size > 0 {
            Region::from_result(RomFs::parse(
                data,
                offset + header.romfs_offset as usize * MEDIA_UNIT,
            ))
        } else {
            Region::Absent
        };

        Ok(Self {
            header,
            exheader,
            logo,
            plain_region,
            exefs,
            romfs,
        })
    }
}

/// Materializes a raw media-unit-scaled region (logo or plain region).
fn read_region(data: &[u8], base: usize, offset: u32, size: u32) -> Region<Vec<u8>> {
    if size == 0 {
        return Region::Absent;
    }

    let mut scanner = Scanner::new(data);
    scanner.seek(base + offset as usize * MEDIA_UNIT);
    Region::from_result(
        scanner
            .read_bytes(size as usize * MEDIA_UNIT)
            .map(<[u8]>::to_vec),
    )
}

/// Reads the 4-byte magic every NCSD/NCCH container keeps at +0x100.
pub(crate) fn magic_at(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let mut scanner = Scanner::new(data);
    scanner.seek(offset + MAGIC_OFFSET);
    scanner.read_u32()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{IVFC_MAGIC, IVFC_MAGIC_NUM, LEVEL3_OFFSET, SENTINEL};

    fn ncch_image(media_units: usize) -> Vec<u8> {
        let mut image = vec![0u8; media_units * MEDIA_UNIT];
        image[0x100..0x104].copy_from_slice(&NCCH_MAGIC.to_le_bytes());
        image
    }

    fn set_u32(image: &mut [u8], offset: usize, value: u32) {
        image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    #[test]
    fn absent_regions_stay_absent() {
        let image = ncch_image(1);
        let ncch = Ncch::parse(&image, 0).unwrap();

        assert!(ncch.exheader.is_absent());
        assert!(ncch.logo.is_absent());
        assert!(ncch.plain_region.is_absent());
        assert!(ncch.exefs.is_absent());
        assert!(ncch.romfs.is_absent());
    }

    #[test]
    fn bad_magic_is_fatal_for_the_partition() {
        let mut image = ncch_image(1);
        set_u32(&mut image, 0x100, 0);

        match Ncch::parse(&image, 0) {
            Err(ParseError::MagicMismatch {
                structure,
                expected,
                actual,
            }) => {
                assert_eq!(structure, "NCCH");
                assert_eq!(expected, NCCH_MAGIC);
                assert_eq!(actual, 0);
            }
            other => panic!("expected MagicMismatch, got {other:?}"),
        }
    }

    #[test]
    fn extended_header_blocks_decode_at_their_relative_offsets() {
        // Exheader at 0x200: SCI at +0, ACI at +0x200, signature and public
        // key at +0x400, the limits ACI at +0x600.
        let mut image = ncch_image(5);
        set_u32(&mut image, 0x180, 0x400);

        image[0x200..0x208].copy_from_slice(b"TESTAPP\0");
        image[0x300..0x308].copy_from_slice(&0x0002_0000u64.to_le_bytes());
        image[0x400..0x408].copy_from_slice(&0x0004_0000_0000_1234u64.to_le_bytes());
        image[0x600] = 0x5A;
        image[0x700] = 0xA5;
        image[0x800..0x808].copy_from_slice(&0x0004_0000_0000_5678u64.to_le_bytes());

        let ncch = Ncch::parse(&image, 0).unwrap();
        let exheader = ncch.exheader.present().expect("exheader should decode");
        assert_eq!(&exheader.sci.app_title, b"TESTAPP\0");
        assert_eq!(exheader.sci.savedata_size, 0x0002_0000);
        assert_eq!(exheader.aci.program_id, 0x0004_0000_0000_1234);
        assert_eq!(exheader.signature[0], 0x5A);
        assert_eq!(exheader.public_key[0], 0xA5);
        assert_eq!(exheader.aci_limits.program_id, 0x0004_0000_0000_5678);
    }

    #[test]
    fn logo_and_plain_are_media_unit_scaled() {
        let mut image = ncch_image(4);
        // Logo: offset 1, size 1; plain region: offset 2, size 2.
        set_u32(&mut image, 0x198, 1);
        set_u32(&mut image, 0x19C, 1);
        set_u32(&mut image, 0x190, 2);
        set_u32(&mut image, 0x194, 2);
        image[0x200] = 0xAA;
        image[0x400] = 0xBB;

        let ncch = Ncch::parse(&image, 0).unwrap();
        let logo = ncch.logo.present().expect("logo should decode");
        assert_eq!(logo.len(), MEDIA_UNIT);
        assert_eq!(logo[0], 0xAA);
        let plain = ncch.plain_region.present().expect("plain region should decode");
        assert_eq!(plain.len(), 2 * MEDIA_UNIT);
        assert_eq!(plain[0], 0xBB);
    }

    #[test]
    fn damaged_romfs_leaves_exefs_usable() {
        // ExeFS at media unit 1, RomFS claimed at media unit 3 with garbage.
        let mut image = ncch_image(16);
        set_u32(&mut image, 0x1A0, 1);
        set_u32(&mut image, 0x1A4, 1);
        set_u32(&mut image, 0x1B0, 3);
        set_u32(&mut image, 0x1B4, 1);

        // One ExeFS slot named "icon" with 4 bytes of data.
        let exefs_base = MEDIA_UNIT;
        image[exefs_base..exefs_base + 4].copy_from_slice(b"icon");
        set_u32(&mut image, exefs_base + 8, 0);
        set_u32(&mut image, exefs_base + 12, 4);
        image[exefs_base + 0x200..exefs_base + 0x204].copy_from_slice(b"SMDH");

        let ncch = Ncch::parse(&image, 0).unwrap();
        let exefs = ncch.exefs.present().expect("ExeFS should decode");
        assert_eq!(exefs.file_data[0].as_deref(), Some(&b"SMDH"[..]));
        assert!(matches!(
            ncch.romfs.error(),
            Some(ParseError::MagicMismatch { .. })
        ));
    }

    #[test]
    fn romfs_region_decodes_through_the_ncch() {
        let romfs_base = 2 * MEDIA_UNIT;
        let mut image = ncch_image(2);
        image.resize(romfs_base + LEVEL3_OFFSET + 0x100, 0);
        set_u32(&mut image, 0x1B0, 2);
        set_u32(&mut image, 0x1B4, 1);

        set_u32(&mut image, romfs_base, IVFC_MAGIC);
        set_u32(&mut image, romfs_base + 4, IVFC_MAGIC_NUM);

        // Minimal Level3: one empty root record.
        let lvl3 = romfs_base + LEVEL3_OFFSET;
        let fields = [0x28u32, 0x28, 0, 0x28, 0x18, 0x40, 0, 0x40, 0, 0x40];
        for (index, field) in fields.iter().enumerate() {
            set_u32(&mut image, lvl3 + index * 4, *field);
        }
        for link in 0..4 {
            set_u32(&mut image, lvl3 + 0x28 + link * 4, if link >= 1 { SENTINEL } else { 0 });
        }
        set_u32(&mut image, lvl3 + 0x28 + 0x10, SENTINEL);
        set_u32(&mut image, lvl3 + 0x28 + 0x14, 0);

        let ncch = Ncch::parse(&image, 0).unwrap();
        let romfs = ncch.romfs.present().expect("RomFS should decode");
        assert_eq!(romfs.root.name, "RomFS");
        assert!(romfs.root.children.is_empty());
    }
}
