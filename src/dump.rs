//! Writes decoded partitions out to disk and renders RomFS trees.
//!
//! The on-disk layout mirrors the containers: each dumped partition gets a
//! numbered directory holding `ExeFS/`, `logo.bin`, `plain_region.bin` and a
//! mirrored `RomFS/` tree, depending on which sections are selected and
//! present.

use crate::{
    error::{FileOpError, Region},
    ncch::Ncch,
    romfs::{find_dir, find_file, Directory, File},
    util,
};
use std::path::Path;

/// Which NCCH sections the `unpack` operation should write.
#[derive(Clone, Copy, Debug)]
pub struct Sections {
    pub exefs: bool,
    pub romfs: bool,
    pub logo: bool,
    pub plain: bool,
}

impl Sections {
    pub const ALL: Sections = Sections {
        exefs: true,
        romfs: true,
        logo: true,
        plain: true,
    };
}

/// Options for dumping a single partition.
pub struct DumpOptions<'a> {
    pub sections: Sections,
    /// RomFS file paths to extract individually instead of the whole tree.
    pub files: &'a [String],
    /// RomFS directory paths to extract individually.
    pub dirs: &'a [String],
    pub overwrite: bool,
}

/// Dumps the selected sections of one partition under `<out_dir>/<slot>/`.
///
/// Damaged regions are reported and skipped; only file I/O failures abort.
pub fn dump_partition(
    ncch: &Ncch,
    slot: usize,
    out_dir: &Path,
    opts: &DumpOptions,
) -> Result<(), Box<FileOpError>> {
    let partition_dir = out_dir.join(slot.to_string());
    util::create_dir_all("partition directory", &partition_dir)?;

    if opts.sections.exefs {
        match &ncch.exefs {
            Region::Present(exefs) => {
                let exefs_dir = partition_dir.join("ExeFS");
                util::create_dir_all("ExeFS directory", &exefs_dir)?;

                for (_, header, data) in exefs.files() {
                    let path = exefs_dir.join(header.name_str());
                    util::save_file("ExeFS file", path, data, opts.overwrite, false)?;
                }
            }
            Region::Damaged(error) => warn!("Skipping damaged ExeFS in partition {slot}: {error}"),
            Region::Absent => {}
        }
    }

    if opts.sections.logo {
        match &ncch.logo {
            Region::Present(logo) => {
                let path = partition_dir.join("logo.bin");
                util::save_file("logo", path, logo, opts.overwrite, false)?;
            }
            Region::Damaged(error) => warn!("Skipping damaged logo in partition {slot}: {error}"),
            Region::Absent => {}
        }
    }

    if opts.sections.plain {
        match &ncch.plain_region {
            Region::Present(plain) => {
                let path = partition_dir.join("plain_region.bin");
                util::save_file("plain region", path, plain, opts.overwrite, false)?;
            }
            Region::Damaged(error) => {
                warn!("Skipping damaged plain region in partition {slot}: {error}")
            }
            Region::Absent => {}
        }
    }

    let romfs = match &ncch.romfs {
        Region::Present(romfs) => Some(romfs),
        Region::Damaged(error) => {
            warn!("Skipping damaged RomFS in partition {slot}: {error}");
            None
        }
        Region::Absent => None,
    };
    let Some(romfs) = romfs else {
        return Ok(());
    };

    if opts.sections.romfs {
        dump_directory(
            &romfs.root,
            &romfs.level3.file_data,
            &partition_dir,
            opts.overwrite,
        )?;
    } else if !opts.files.is_empty() || !opts.dirs.is_empty() {
        let romfs_dir = partition_dir.join("RomFS");

        for path in opts.files {
            let Some(file) = find_file(&romfs.root, path) else {
                warn!("No file at RomFS path '{path}' in partition {slot}.");
                continue;
            };
            let dest = romfs_dir.join(path);
            let parent = dest.parent().unwrap_or(&romfs_dir);
            util::create_dir_all("RomFS directory", parent)?;
            dump_file(file, &romfs.level3.file_data, parent, opts.overwrite)?;
        }

        for path in opts.dirs {
            let Some(dir) = find_dir(&romfs.root, path) else {
                warn!("No directory at RomFS path '{path}' in partition {slot}.");
                continue;
            };
            let dest = romfs_dir.join(path);
            let parent = dest.parent().unwrap_or(&romfs_dir);
            util::create_dir_all("RomFS directory", parent)?;
            dump_directory(dir, &romfs.level3.file_data, parent, opts.overwrite)?;
        }
    }

    Ok(())
}

/// Recreates `dir` (and everything below it) under `parent`.
fn dump_directory(
    dir: &Directory,
    file_data: &[u8],
    parent: &Path,
    overwrite: bool,
) -> Result<(), Box<FileOpError>> {
    let path = parent.join(&dir.name);
    util::create_dir_all("RomFS directory", &path)?;

    for child in &dir.children {
        dump_directory(child, file_data, &path, overwrite)?;
    }
    for file in &dir.files {
        dump_file(file, file_data, &path, overwrite)?;
    }

    Ok(())
}

fn dump_file(
    file: &File,
    file_data: &[u8],
    dir: &Path,
    overwrite: bool,
) -> Result<(), Box<FileOpError>> {
    let Some(data) = slice_file(file_data, file) else {
        warn!(
            "File '{}' points outside the file data region, skipping.",
            file.name
        );
        return Ok(());
    };

    util::save_file("RomFS file", dir.join(&file.name), data, overwrite, false)
}

fn slice_file<'a>(file_data: &'a [u8], file: &File) -> Option<&'a [u8]> {
    let start = usize::try_from(file.offset).ok()?;
    let end = start.checked_add(usize::try_from(file.size).ok()?)?;
    file_data.get(start..end)
}

/// Prints a RomFS directory tree with box-drawing prefixes.
pub fn print_tree(dir: &Directory) {
    print_tree_at(dir, 0);
}

fn print_tree_at(dir: &Directory, level: usize) {
    if level > 0 {
        println!("{}├{}", "│".repeat(level - 1), dir.name);
    } else {
        println!("{}", dir.name);
    }

    for child in &dir.children {
        print_tree_at(child, level + 1);
    }

    for (index, file) in dir.files.iter().enumerate() {
        let branch = if index + 1 == dir.files.len() {
            '└'
        } else {
            '├'
        };
        println!("{}{}{}", "│".repeat(level), branch, file.name);
    }
}

#[cfg(test)]
mod tests {
    use super::slice_file;
    use crate::romfs::File;

    #[test]
    fn slice_file_rejects_out_of_range_extents() {
        let blob = [0u8; 8];

        let ok = File {
            name: "a".into(),
            offset: 2,
            size: 4,
        };
        assert_eq!(slice_file(&blob, &ok), Some(&blob[2..6]));

        let too_long = File {
            name: "b".into(),
            offset: 4,
            size: 8,
        };
        assert_eq!(slice_file(&blob, &too_long), None);

        let overflowing = File {
            name: "c".into(),
            offset: u64::MAX,
            size: 1,
        };
        assert_eq!(slice_file(&blob, &overflowing), None);
    }
}
