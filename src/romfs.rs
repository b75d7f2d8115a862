//! Decoder for the RomFS image embedded in an NCCH partition.
//!
//! A RomFS is an IVFC container with three integrity levels; only level 3
//! holds actual filesystem data and only it is interpreted here. Level 3 is
//! four flat tables (directory hashes, directory metadata, file hashes, file
//! metadata) followed by the raw file data. The metadata tables embed
//! sibling/child offset chains which [`build_tree`] follows to reconstruct
//! the directory hierarchy.
//!
//! Two different offset bases are in play: link offsets inside directory
//! records are relative to the start of the directory metadata table, link
//! offsets inside file records to the start of the file metadata table.
//! Mixing them up is the classic mistake with this format.

use crate::{
    error::ParseError,
    format::{
        align4, DIR_RECORD_LEN, FILE_RECORD_LEN, IVFC_MAGIC, IVFC_MAGIC_NUM, LEVEL3_OFFSET,
        MAX_TREE_DEPTH, SENTINEL,
    },
    scanner::Scanner,
};
use std::collections::{HashMap, HashSet};

/// Name assigned to the reconstructed root directory. Its on-disk name field
/// is empty by convention.
pub const ROOT_NAME: &str = "RomFS";

/// The IVFC header at the start of a RomFS region. Levels 1 and 2 describe
/// block-hash integrity data which is retained but never verified.
#[derive(Clone, Debug)]
pub struct RomFsHeader {
    pub magic: u32,
    pub magic_num: u32,
    pub master_hash_size: u32,
    pub lvl1_offset: u64,
    pub lvl1_hash_size: u64,
    pub lvl1_block_size: u32,
    pub lvl2_offset: u64,
    pub lvl2_hash_size: u64,
    pub lvl2_block_size: u32,
    pub lvl3_offset: u64,
    pub lvl3_hash_size: u64,
    pub lvl3_block_size: u32,
    pub optional_info_size: u32,
}

impl RomFsHeader {
    pub fn parse(data: &[u8], offset: usize) -> Result<Self, ParseError> {
        let mut scanner = Scanner::new(data);
        scanner.seek(offset);

        let magic = scanner.read_u32()?;
        let magic_num = scanner.read_u32()?;
        let master_hash_size = scanner.read_u32()?;
        let lvl1_offset = scanner.read_u64()?;
        let lvl1_hash_size = scanner.read_u64()?;
        let lvl1_block_size = scanner.read_u32()?;
        scanner.skip(4);
        let lvl2_offset = scanner.read_u64()?;
        let lvl2_hash_size = scanner.read_u64()?;
        let lvl2_block_size = scanner.read_u32()?;
        scanner.skip(4);
        let lvl3_offset = scanner.read_u64()?;
        let lvl3_hash_size = scanner.read_u64()?;
        let lvl3_block_size = scanner.read_u32()?;
        scanner.skip(8);
        let optional_info_size = scanner.read_u32()?;

        Ok(Self {
            magic,
            magic_num,
            master_hash_size,
            lvl1_offset,
            lvl1_hash_size,
            lvl1_block_size,
            lvl2_offset,
            lvl2_hash_size,
            lvl2_block_size,
            lvl3_offset,
            lvl3_hash_size,
            lvl3_block_size,
            optional_info_size,
        })
    }
}

/// The ten u32 fields at the start of the Level3 region. All offsets are
/// relative to the Level3 base. The file data region has no length field;
/// its size is derived from the file metadata records.
#[derive(Clone, Debug)]
pub struct Level3Header {
    pub header_length: u32,
    pub dir_hash_offset: u32,
    pub dir_hash_length: u32,
    pub dir_meta_offset: u32,
    pub dir_meta_length: u32,
    pub file_hash_offset: u32,
    pub file_hash_length: u32,
    pub file_meta_offset: u32,
    pub file_meta_length: u32,
    pub file_data_offset: u32,
}

impl Level3Header {
    pub fn parse(data: &[u8], offset: usize) -> Result<Self, ParseError> {
        let mut scanner = Scanner::new(data);
        scanner.seek(offset);

        Ok(Self {
            header_length: scanner.read_u32()?,
            dir_hash_offset: scanner.read_u32()?,
            dir_hash_length: scanner.read_u32()?,
            dir_meta_offset: scanner.read_u32()?,
            dir_meta_length: scanner.read_u32()?,
            file_hash_offset: scanner.read_u32()?,
            file_hash_length: scanner.read_u32()?,
            file_meta_offset: scanner.read_u32()?,
            file_meta_length: scanner.read_u32()?,
            file_data_offset: scanner.read_u32()?,
        })
    }
}

/// A directory metadata record. All link offsets are relative to the start
/// of the directory metadata table; [`SENTINEL`] marks "no relation".
#[derive(Clone, Debug)]
pub struct DirectoryMetadata {
    /// This record's own offset relative to the table start.
    pub table_offset: u32,
    pub parent_offset: u32,
    pub sibling_offset: u32,
    pub child_offset: u32,
    pub first_file_offset: u32,
    pub same_hash_offset: u32,
    /// Decoded UTF-16LE name. Empty for the root record.
    pub name: String,
}

/// A file metadata record. Link offsets are relative to the start of the
/// file metadata table; data offset and size are relative to the start of
/// the file data region.
#[derive(Clone, Debug)]
pub struct FileMetadata {
    /// This record's own offset relative to the table start.
    pub table_offset: u32,
    pub parent_offset: u32,
    pub sibling_offset: u32,
    pub data_offset: u64,
    pub data_size: u64,
    pub same_hash_offset: u32,
    pub name: String,
}

/// The decoded Level3 region: the four flat tables plus the materialized
/// file data region.
#[derive(Clone, Debug)]
pub struct Level3 {
    pub header: Level3Header,
    /// Raw hash bucket heads, retained verbatim and never consulted by the
    /// tree builder.
    pub dir_hash_table: Vec<u32>,
    pub dir_table: Vec<DirectoryMetadata>,
    pub file_hash_table: Vec<u32>,
    pub file_table: Vec<FileMetadata>,
    pub file_data: Vec<u8>,
}

/// A reconstructed directory. Owns its children; sequences keep the on-disk
/// sibling-chain order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Directory {
    pub name: String,
    pub children: Vec<Directory>,
    pub files: Vec<File>,
}

/// A reconstructed file. The byte range points into the Level3 file data
/// region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct File {
    pub name: String,
    pub offset: u64,
    pub size: u64,
}

/// A fully decoded RomFS partition.
#[derive(Clone, Debug)]
pub struct RomFs {
    pub header: RomFsHeader,
    pub level3: Level3,
    pub root: Directory,
}

impl RomFs {
    /// Decodes the RomFS region at `offset` inside `data` and reconstructs
    /// its directory tree.
    pub fn parse(data: &[u8], offset: usize) -> Result<Self, ParseError> {
        let header = RomFsHeader::parse(data, offset)?;

        if header.magic != IVFC_MAGIC {
            return Err(ParseError::MagicMismatch {
                structure: "RomFS",
                expected: IVFC_MAGIC,
                actual: header.magic,
            });
        }
        if header.magic_num != IVFC_MAGIC_NUM {
            return Err(ParseError::MagicMismatch {
                structure: "RomFS",
                expected: IVFC_MAGIC_NUM,
                actual: header.magic_num,
            });
        }

        let level3 = Level3::parse(data, offset + LEVEL3_OFFSET)?;
        let root = build_tree(&level3)?;

        Ok(Self {
            header,
            level3,
            root,
        })
    }
}

impl Level3 {
    /// Decodes the Level3 tables at `offset` inside `data`.
    ///
    /// The file data region's size is not stored anywhere; it is computed as
    /// the maximum extent (`data_offset + data_size`) over every file record
    /// and that many bytes are materialized.
    pub fn parse(data: &[u8], offset: usize) -> Result<Self, ParseError> {
        let header = Level3Header::parse(data, offset)?;

        let dir_hash_table = parse_hash_table(
            data,
            offset + header.dir_hash_offset as usize,
            header.dir_hash_length,
        )?;
        let dir_table = parse_dir_table(data, offset, &header)?;
        let file_hash_table = parse_hash_table(
            data,
            offset + header.file_hash_offset as usize,
            header.file_hash_length,
        )?;
        let file_table = parse_file_table(data, offset, &header)?;

        debug!(
            "Level3 holds {} directory and {} file records.",
            dir_table.len(),
            file_table.len()
        );

        let mut max_extent = 0u64;
        for record in &file_table {
            let end = record
                .data_offset
                .checked_add(record.data_size)
                .ok_or_else(|| {
                    ParseError::InconsistentTable(format!(
                        "file '{}' extent {:#x}+{:#x} overflows",
                        record.name, record.data_offset, record.data_size
                    ))
                })?;
            max_extent = max_extent.max(end);
        }

        let data_len = usize::try_from(max_extent).map_err(|_| {
            ParseError::InconsistentTable(format!(
                "file data region of {max_extent:#x} bytes does not fit in memory"
            ))
        })?;
        let mut scanner = Scanner::new(data);
        scanner.seek(offset + header.file_data_offset as usize);
        let file_data = scanner.read_bytes(data_len)?.to_vec();

        Ok(Self {
            header,
            dir_hash_table,
            dir_table,
            file_hash_table,
            file_table,
            file_data,
        })
    }
}

fn parse_hash_table(data: &[u8], offset: usize, length: u32) -> Result<Vec<u32>, ParseError> {
    let mut scanner = Scanner::new(data);
    scanner.seek(offset);

    let count = length as usize / 4;
    let mut table = Vec::with_capacity(count);
    for _ in 0..count {
        table.push(scanner.read_u32()?);
    }
    Ok(table)
}

fn decode_utf16(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Reads the name field of a metadata record whose fixed part spans
/// `record_len` bytes, enforcing that the name stays inside the table.
fn read_record_name(
    scanner: &mut Scanner,
    table_offset: usize,
    table_len: usize,
    record_len: usize,
) -> Result<(String, usize), ParseError> {
    let name_length = scanner.read_u32()? as usize;
    if table_offset + record_len + name_length > table_len {
        return Err(ParseError::InconsistentTable(format!(
            "record at {table_offset:#x} declares a {name_length:#x}-byte name \
             crossing the table end ({table_len:#x})"
        )));
    }

    // Names are UTF-16LE; the length field is in bytes.
    let name = decode_utf16(scanner.read_bytes(name_length & !1)?);
    Ok((name, name_length))
}

/// Walks the packed directory metadata table. Each record is `0x18` bytes
/// plus its name, padded so the next record starts on a 4-byte boundary; the
/// end of the walk comes from the table's own declared length.
fn parse_dir_table(
    data: &[u8],
    level3_base: usize,
    header: &Level3Header,
) -> Result<Vec<DirectoryMetadata>, ParseError> {
    let table_base = level3_base + header.dir_meta_offset as usize;
    let table_len = header.dir_meta_length as usize;

    let mut table = Vec::new();
    let mut offset = 0usize;
    while offset + DIR_RECORD_LEN <= table_len {
        let mut scanner = Scanner::new(data);
        scanner.seek(table_base + offset);

        let parent_offset = scanner.read_u32()?;
        let sibling_offset = scanner.read_u32()?;
        let child_offset = scanner.read_u32()?;
        let first_file_offset = scanner.read_u32()?;
        let same_hash_offset = scanner.read_u32()?;
        let (name, name_length) =
            read_record_name(&mut scanner, offset, table_len, DIR_RECORD_LEN)?;

        table.push(DirectoryMetadata {
            table_offset: offset as u32,
            parent_offset,
            sibling_offset,
            child_offset,
            first_file_offset,
            same_hash_offset,
            name,
        });

        offset = align4(offset + DIR_RECORD_LEN + name_length);
    }

    Ok(table)
}

/// Same walking scheme as [`parse_dir_table`] with the `0x20`-byte file
/// record layout.
fn parse_file_table(
    data: &[u8],
    level3_base: usize,
    header: &Level3Header,
) -> Result<Vec<FileMetadata>, ParseError> {
    let table_base = level3_base + header.file_meta_offset as usize;
    let table_len = header.file_meta_length as usize;

    let mut table = Vec::new();
    let mut offset = 0usize;
    while offset + FILE_RECORD_LEN <= table_len {
        let mut scanner = Scanner::new(data);
        scanner.seek(table_base + offset);

        let parent_offset = scanner.read_u32()?;
        let sibling_offset = scanner.read_u32()?;
        let data_offset = scanner.read_u64()?;
        let data_size = scanner.read_u64()?;
        let same_hash_offset = scanner.read_u32()?;
        let (name, name_length) =
            read_record_name(&mut scanner, offset, table_len, FILE_RECORD_LEN)?;

        table.push(FileMetadata {
            table_offset: offset as u32,
            parent_offset,
            sibling_offset,
            data_offset,
            data_size,
            same_hash_offset,
            name,
        });

        offset = align4(offset + FILE_RECORD_LEN + name_length);
    }

    Ok(table)
}

/// Reconstructs the directory tree from the flat Level3 tables.
///
/// The root is the directory record at table offset 0 and is given the
/// literal name [`ROOT_NAME`]. Traversal is index-based over the decoded
/// tables with a visited-offset set per table and an explicit depth guard,
/// so corrupted sibling/child chains terminate with
/// [`ParseError::CyclicStructure`] or [`ParseError::TreeTooDeep`] instead of
/// looping or exhausting the stack.
pub fn build_tree(level3: &Level3) -> Result<Directory, ParseError> {
    let mut builder = TreeBuilder {
        dirs: &level3.dir_table,
        files: &level3.file_table,
        dir_index: level3
            .dir_table
            .iter()
            .enumerate()
            .map(|(index, record)| (record.table_offset, index))
            .collect(),
        file_index: level3
            .file_table
            .iter()
            .enumerate()
            .map(|(index, record)| (record.table_offset, index))
            .collect(),
        seen_dirs: HashSet::new(),
        seen_files: HashSet::new(),
    };

    if !builder.dir_index.contains_key(&0) {
        return Err(ParseError::InconsistentTable(
            "directory metadata table has no root record".into(),
        ));
    }

    builder.seen_dirs.insert(0);
    builder.build_dir(0, 0)
}

struct TreeBuilder<'a> {
    dirs: &'a [DirectoryMetadata],
    files: &'a [FileMetadata],
    dir_index: HashMap<u32, usize>,
    file_index: HashMap<u32, usize>,
    seen_dirs: HashSet<u32>,
    seen_files: HashSet<u32>,
}

impl<'a> TreeBuilder<'a> {
    fn dir_at(&self, offset: u32) -> Result<&'a DirectoryMetadata, ParseError> {
        self.dir_index
            .get(&offset)
            .map(|&index| &self.dirs[index])
            .ok_or_else(|| {
                ParseError::InconsistentTable(format!(
                    "directory link {offset:#x} points between records"
                ))
            })
    }

    fn file_at(&self, offset: u32) -> Result<&'a FileMetadata, ParseError> {
        self.file_index
            .get(&offset)
            .map(|&index| &self.files[index])
            .ok_or_else(|| {
                ParseError::InconsistentTable(format!(
                    "file link {offset:#x} points between records"
                ))
            })
    }

    /// Builds the directory at `offset`, which the caller has already marked
    /// as seen.
    fn build_dir(&mut self, offset: u32, depth: usize) -> Result<Directory, ParseError> {
        if depth >= MAX_TREE_DEPTH {
            return Err(ParseError::TreeTooDeep);
        }

        let meta = self.dir_at(offset)?;

        let mut children = Vec::new();
        let mut next = meta.child_offset;
        while next != SENTINEL {
            if !self.seen_dirs.insert(next) {
                return Err(ParseError::CyclicStructure { offset: next });
            }
            let sibling = self.dir_at(next)?.sibling_offset;
            children.push(self.build_dir(next, depth + 1)?);
            next = sibling;
        }

        let mut files = Vec::new();
        let mut next = meta.first_file_offset;
        while next != SENTINEL {
            if !self.seen_files.insert(next) {
                return Err(ParseError::CyclicStructure { offset: next });
            }
            let record = self.file_at(next)?;
            files.push(File {
                name: record.name.clone(),
                offset: record.data_offset,
                size: record.data_size,
            });
            next = record.sibling_offset;
        }

        let name = if offset == 0 {
            ROOT_NAME.to_string()
        } else {
            meta.name.clone()
        };

        Ok(Directory {
            name,
            children,
            files,
        })
    }
}

/// Looks a directory up by a `/`-separated path relative to `root`. An empty
/// path names the root itself.
pub fn find_dir<'a>(root: &'a Directory, path: &str) -> Option<&'a Directory> {
    let mut dir = root;
    for component in path.split('/').filter(|c| !c.is_empty()) {
        dir = dir.children.iter().find(|child| child.name == component)?;
    }
    Some(dir)
}

/// Looks a file up by a `/`-separated path relative to `root`.
pub fn find_file<'a>(root: &'a Directory, path: &str) -> Option<&'a File> {
    let (dir_path, file_name) = path.rsplit_once('/').unwrap_or(("", path));
    let dir = find_dir(root, dir_path)?;
    dir.files.iter().find(|file| file.name == file_name)
}
