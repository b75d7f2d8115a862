#[macro_use]
extern crate log;

mod dump;
mod error;
mod exefs;
mod format;
mod ncch;
mod ncsd;
mod romfs;
mod scanner;
mod util;

use clap::{arg, command, value_parser, ArgAction, ArgMatches, Command};
use dump::{DumpOptions, Sections};
use error::{Region, UnpackError};
use log::LevelFilter;
use ncch::Ncch;
use ncsd::{Image, Ncsd};
use simple_logger::SimpleLogger;
use std::{
    fs,
    io::ErrorKind as IoErrorKind,
    path::{Path, PathBuf},
};

fn partition_mask(matches: &ArgMatches) -> u8 {
    match matches.get_many::<u8>("partition") {
        Some(slots) => slots.fold(0u8, |mask, &slot| mask | (1 << slot)),
        None => 0xFF,
    }
}

fn string_values(matches: &ArgMatches, id: &str) -> Vec<String> {
    matches
        .get_many::<String>(id)
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}

fn load_image(path: &Path) -> Result<Image, UnpackError> {
    let data = util::read_file("image", path)?;
    info!("Loaded file at path {}.", path.display());

    Image::parse(&data).map_err(|e| UnpackError::ImageParse(path, e))
}

fn do_unpack<'a>(
    in_file: &'a Path,
    out_dir: Option<&'a Path>,
    create_parent_dirs: bool,
    partitions: u8,
    opts: &DumpOptions,
) -> Result<(), UnpackError<'a>> {
    let image = load_image(in_file)?;

    if let Some(path) = out_dir {
        let result = if create_parent_dirs {
            fs::create_dir_all(path)
        } else {
            fs::create_dir(path)
        };

        if let Err(e) = result {
            match e.kind() {
                IoErrorKind::AlreadyExists => {
                    if !path.is_dir() {
                        return Err(UnpackError::OutDirIsNotDir(path));
                    }
                }
                _ => return Err(UnpackError::FailedToCreateOutDir(path, e)),
            }
        }
    }
    let out_dir = out_dir.map(Path::to_path_buf).unwrap_or_default();

    match &image {
        Image::Ncsd(ncsd) => {
            for (slot, partition) in ncsd.partitions.iter().enumerate() {
                if partitions & (1 << slot) == 0 {
                    continue;
                }

                match partition {
                    Region::Present(ncch) => dump::dump_partition(ncch, slot, &out_dir, opts)?,
                    Region::Damaged(e) => error!("Skipping damaged partition {}: {}", slot, e),
                    Region::Absent => debug!("Partition {} is not present.", slot),
                }
            }
        }
        Image::Ncch(ncch) => {
            if partitions & 1 != 0 {
                dump::dump_partition(ncch, 0, &out_dir, opts)?;
            }
        }
    }

    info!("Done.");

    Ok(())
}

fn print_romfs(slot: usize, ncch: &Ncch) {
    match &ncch.romfs {
        Region::Present(romfs) => {
            println!("Partition {}:", slot);
            dump::print_tree(&romfs.root);
        }
        Region::Damaged(e) => warn!("RomFS of partition {} is damaged: {}", slot, e),
        Region::Absent => debug!("Partition {} has no RomFS.", slot),
    }
}

fn do_print(in_file: &Path, partitions: u8) -> Result<(), UnpackError> {
    let image = load_image(in_file)?;

    match &image {
        Image::Ncsd(ncsd) => {
            for (slot, partition) in ncsd.partitions.iter().enumerate() {
                if partitions & (1 << slot) == 0 {
                    continue;
                }

                match partition {
                    Region::Present(ncch) => print_romfs(slot, ncch),
                    Region::Damaged(e) => error!("Skipping damaged partition {}: {}", slot, e),
                    Region::Absent => {}
                }
            }
        }
        Image::Ncch(ncch) => print_romfs(0, ncch),
    }

    Ok(())
}

fn print_ncch_info(slot: usize, ncch: &Ncch) {
    let header = &ncch.header;

    println!("Partition {}:", slot);
    println!("  partition id:  {:#018x}", header.partition_id);
    println!("  program id:    {:#018x}", header.program_id);
    println!("  product code:  {}", header.product_code_str());
    println!("  maker code:    {:#06x}", header.maker_code);
    println!("  version:       {:#06x}", header.version);
    println!("  flags:         {}", hex::encode(header.flags));
    println!("  exheader size: {:#x}", header.exheader_size);
    for (name, offset, size) in [
        ("plain", header.plain_offset, header.plain_size),
        ("logo", header.logo_offset, header.logo_size),
        ("exefs", header.exefs_offset, header.exefs_size),
        ("romfs", header.romfs_offset, header.romfs_size),
    ] {
        println!(
            "  {:<6} offset {:#x}, size {:#x} (media units)",
            name, offset, size
        );
    }
    println!("  exefs hash:    {}", hex::encode(header.exefs_super_hash));
    println!("  romfs hash:    {}", hex::encode(header.romfs_super_hash));
}

fn print_ncsd_info(ncsd: &Ncsd) {
    let header = &ncsd.header;

    println!("NCSD image:");
    println!("  size:       {:#x} (media units)", header.size);
    println!("  media id:   {:#018x}", header.media_id);
    println!("  fs type:    {:#x}", header.fs_type);
    println!("  crypt type: {:#x}", header.crypt_type);
    for (slot, entry) in header.partition_table.iter().enumerate() {
        if entry.size == 0 {
            continue;
        }
        println!(
            "  partition {}: offset {:#x}, size {:#x} (media units), id {:#018x}",
            slot, entry.offset, entry.size, ncsd.cart_header.partition_id_table[slot]
        );
    }
}

fn do_info(in_file: &Path) -> Result<(), UnpackError> {
    let image = load_image(in_file)?;

    match &image {
        Image::Ncsd(ncsd) => {
            print_ncsd_info(ncsd);
            for (slot, partition) in ncsd.partitions.iter().enumerate() {
                match partition {
                    Region::Present(ncch) => print_ncch_info(slot, ncch),
                    Region::Damaged(e) => error!("Skipping damaged partition {}: {}", slot, e),
                    Region::Absent => {}
                }
            }
        }
        Image::Ncch(ncch) => print_ncch_info(0, ncch),
    }

    Ok(())
}

fn main() {
    let in_file_arg = || {
        arg!(in_file: <PATH>)
            .value_parser(value_parser!(PathBuf))
            .help("Path to the NCSD/NCCH image.")
    };
    let partition_arg = || {
        arg!(partition: -n --partition [N])
            .value_parser(value_parser!(u8).range(0..=7))
            .action(ArgAction::Append)
            .help("Restricts the operation to partition N (may be repeated). The default is all partitions.")
    };

    let matches = command!()
        .propagate_version(true)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            arg!(log_level: -l --log_level <LEVEL>)
                .default_value("WARN")
                .help(
                    "Configures the log level for the tool. Available log levels are: NONE \
                    (disables logging entirely), TRACE, DEBUG, INFO, WARN and ERROR.",
                ),
        )
        .subcommand(
            Command::new("unpack")
                .arg(arg!(overwrite: -o --overwrite).help(
                    "Overwrite files instead of prompting when a file exists in the output \
                        directory.",
                ))
                .arg(
                    arg!(create_parent_dirs: -p --create_parent_dirs).help(
                        "Create parent directories when the output directory does not exist.",
                    ),
                )
                .arg(partition_arg())
                .arg(arg!(exefs: -e --exefs).help("Dump the ExeFS of the selected partitions."))
                .arg(arg!(romfs: -r --romfs).help("Dump the RomFS of the selected partitions."))
                .arg(arg!(logo: --logo).help("Dump the logo section of the selected partitions."))
                .arg(
                    arg!(plain: --plain)
                        .help("Dump the plain region of the selected partitions."),
                )
                .arg(
                    arg!(file: -f --file [PATH])
                        .action(ArgAction::Append)
                        .help("Dump a single RomFS file at the given path (may be repeated)."),
                )
                .arg(
                    arg!(dir: -d --dir [PATH])
                        .action(ArgAction::Append)
                        .help("Dump a single RomFS directory at the given path (may be repeated)."),
                )
                .arg(in_file_arg())
                .arg(
                    arg!(out_dir: [OUT_DIR])
                        .value_parser(value_parser!(PathBuf))
                        .help(
                            "Path to the directory where the unpacked files will be written. The \
                            default is the current working directory.",
                        ),
                )
                .about(
                    "Unpacks the sections of an NCSD/NCCH image into a directory. With no \
                    section flags everything is dumped; with --file/--dir only the named \
                    RomFS entries are.",
                ),
        )
        .subcommand(
            Command::new("print")
                .arg(partition_arg())
                .arg(in_file_arg())
                .about("Prints the RomFS filesystem tree of the selected partitions."),
        )
        .subcommand(
            Command::new("info")
                .arg(in_file_arg())
                .about("Prints the NCSD and NCCH header fields of an image."),
        )
        .get_matches();

    let log_level: String = matches.get_one::<String>("log_level").unwrap().to_string();
    let log_level = match log_level.as_str() {
        "NONE" | "none" => LevelFilter::Off,
        "TRACE" | "trace" => LevelFilter::Trace,
        "DEBUG" | "debug" => LevelFilter::Debug,
        "INFO" | "info" => LevelFilter::Info,
        "WARN" | "warn" => LevelFilter::Warn,
        "ERROR" | "error" => LevelFilter::Error,
        _ => LevelFilter::Warn,
    };

    SimpleLogger::new().with_level(log_level).init().unwrap();

    match matches.subcommand() {
        Some(("unpack", sub_matches)) => {
            let in_file = sub_matches.get_one::<PathBuf>("in_file").unwrap();
            let out_dir = sub_matches.get_one::<PathBuf>("out_dir");
            let overwrite = sub_matches.get_flag("overwrite");
            let create_parent_dirs = sub_matches.get_flag("create_parent_dirs");
            let partitions = partition_mask(sub_matches);
            let files = string_values(sub_matches, "file");
            let dirs = string_values(sub_matches, "dir");

            let exefs = sub_matches.get_flag("exefs");
            let romfs = sub_matches.get_flag("romfs");
            let logo = sub_matches.get_flag("logo");
            let plain = sub_matches.get_flag("plain");
            let sections = if exefs || romfs || logo || plain {
                Sections {
                    exefs,
                    romfs,
                    logo,
                    plain,
                }
            } else if !files.is_empty() || !dirs.is_empty() {
                // Only the named RomFS entries.
                Sections {
                    exefs: false,
                    romfs: false,
                    logo: false,
                    plain: false,
                }
            } else {
                Sections::ALL
            };

            let opts = DumpOptions {
                sections,
                files: &files,
                dirs: &dirs,
                overwrite,
            };

            if let Err(e) = do_unpack(
                in_file,
                out_dir.map(PathBuf::as_path),
                create_parent_dirs,
                partitions,
                &opts,
            ) {
                error!("{}", e);
            }
        }
        Some(("print", sub_matches)) => {
            let in_file = sub_matches.get_one::<PathBuf>("in_file").unwrap();
            let partitions = partition_mask(sub_matches);

            if let Err(e) = do_print(in_file, partitions) {
                error!("{}", e);
            }
        }
        Some(("info", sub_matches)) => {
            let in_file = sub_matches.get_one::<PathBuf>("in_file").unwrap();

            if let Err(e) = do_info(in_file) {
                error!("{}", e);
            }
        }
        Some(_) | None => unreachable!(),
    }
}
