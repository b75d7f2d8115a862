use crate::error::FileOpError;
use dialoguer::Confirm;
use std::{
    fs::{File, OpenOptions},
    io::{Read, Write},
    path::Path,
};

fn read_file_impl(name: &'static str, path: &Path) -> Result<Vec<u8>, Box<FileOpError>> {
    let mut f = File::open(path)
        .map_err(|error| FileOpError::make_open(name, path.to_path_buf(), error))?;
    let mut v = Vec::new();
    f.read_to_end(&mut v)
        .map_err(|error| FileOpError::make_read(name, path.to_path_buf(), error))?;
    Ok(v)
}

/// Reads a file from the specified path.
///
/// # Errors
/// This function will return a boxed `FileOpError` with either the `FileOpAction::Open` or the
/// `FileOpAction::Read` action in case an I/O error occurs while opening or reading the file.
pub fn read_file<P: AsRef<Path>>(name: &'static str, path: P) -> Result<Vec<u8>, Box<FileOpError>> {
    read_file_impl(name, path.as_ref())
}

fn create_file_impl(
    name: &'static str,
    path: &Path,
    overwrite: bool,
    silent: bool,
) -> Result<File, Box<FileOpError>> {
    let map_error = |error| FileOpError::make_create(name, path.to_path_buf(), error);
    let result = OpenOptions::new()
        .write(true)
        .create_new(!overwrite)
        .create(overwrite)
        .truncate(overwrite)
        .open(path)
        .map_err(map_error);

    let Err(error) = result else {
        return result;
    };

    // In case neither the overwrite flag nor the silent flag was passed, we want to ask the user if
    // they want to overwrite the file on receiving a "file exists" error.
    if !overwrite && !silent && error.is_exists() && path.is_file() {
        let response = Confirm::new()
            .with_prompt(format!(
                "Do you want to overwrite the file at '{}'?",
                path.display()
            ))
            .default(false)
            .interact()
            .expect("failed to display a prompt to the user");

        if response {
            return OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
                .map_err(map_error);
        }
    }

    Err(error)
}

/// Creates a file at the specified path.
///
/// In case the `overwrite` argument is `true`, the file will be either created or truncated if it
/// exists, otherwise in case `silent` is `false` the user will be asked if overwriting the file is
/// ok, otherwise an error will be returned.
///
/// # Errors
/// This function will return a boxed `FileOpError` with the `FileOpAction::Create` action in case
/// an I/O error occurs while creating the file.
pub fn create_file<P: AsRef<Path>>(
    name: &'static str,
    path: P,
    overwrite: bool,
    silent: bool,
) -> Result<File, Box<FileOpError>> {
    create_file_impl(name, path.as_ref(), overwrite, silent)
}

fn save_file_impl(
    name: &'static str,
    path: &Path,
    data: &[u8],
    overwrite: bool,
    silent: bool,
) -> Result<(), Box<FileOpError>> {
    create_file(name, path, overwrite, silent)?
        .write_all(data)
        .map_err(|error| FileOpError::make_write(name, path.to_path_buf(), error))?;

    info!("Saved {} to {}.", name, path.display());

    Ok(())
}

/// Creates a file at the specified path and writes data from a slice into it.
///
/// In case the `overwrite` argument is `true`, the file will be either created or truncated and
/// overwritten if it exists. If the `overwrite` argument is false either a prompt will be
/// displayed to the user to try and open an existing file truncating it or, in case the `silent`
/// argument is `true`, an error will be returned.
///
/// File creation is handled by the [`create_file`] function internally.
///
/// # Errors
/// This function will return a boxed [`FileOpError`] with either [`FileOpAction::Create`] or
/// [`FileOpAction::Write`] action in case an I/O error occurs while either creating or writing the
/// file.
///
/// [`FileOpAction::Create`]: crate::error::FileOpAction::Create
/// [`FileOpAction::Write`]: crate::error::FileOpAction::Write
pub fn save_file<P: AsRef<Path>>(
    name: &'static str,
    path: P,
    data: &[u8],
    overwrite: bool,
    silent: bool,
) -> Result<(), Box<FileOpError>> {
    save_file_impl(name, path.as_ref(), data, overwrite, silent)
}

/// Creates a directory and any missing parents.
///
/// Already-existing directories are not an error.
///
/// # Errors
/// This function will return a boxed `FileOpError` with the `FileOpAction::CreateDir` action in
/// case the directory couldn't be created.
pub fn create_dir_all<P: AsRef<Path>>(name: &'static str, path: P) -> Result<(), Box<FileOpError>> {
    let path = path.as_ref();
    std::fs::create_dir_all(path)
        .map_err(|error| FileOpError::make_create_dir(name, path.to_path_buf(), error))
}
