/*
 * This module provides utility functions for path manipulation: locating the
 * application's local configuration directory and picking collision-free
 * destination names for relocated companions.
 */
use directories::ProjectDirs;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/*
 * Retrieves the application's local configuration directory, creating it if
 * necessary. Returns `None` if the platform offers no such directory or it
 * cannot be created.
 */
pub fn get_base_app_config_local_dir(app_name: &str) -> Option<PathBuf> {
    log::trace!("PathUtils: Attempting to get base app config local dir for '{app_name}'");
    ProjectDirs::from("", "", app_name).and_then(|proj_dirs| {
        let config_path = proj_dirs.config_local_dir();
        if !config_path.exists() {
            if let Err(e) = fs::create_dir_all(config_path) {
                log::error!(
                    "PathUtils: Failed to create base app config directory {config_path:?}: {e}"
                );
                return None;
            }
            log::debug!("PathUtils: Created base app config directory: {config_path:?}");
        }
        Some(config_path.to_path_buf())
    })
}

/*
 * Returns `candidate` if `is_taken` reports it free, otherwise the first free
 * name of the form `stem.1.ext`, `stem.2.ext`, ... Directories and files
 * without an extension become `name.1`, `name.2`, ...
 *
 * The numbering only depends on which names are taken, so repeated runs over
 * the same tree produce the same names.
 */
pub fn unique_destination_with<F>(candidate: &Path, treat_as_dir: bool, mut is_taken: F) -> PathBuf
where
    F: FnMut(&Path) -> bool,
{
    if !is_taken(candidate) {
        return candidate.to_path_buf();
    }

    let (stem, extension) = match (treat_as_dir, candidate.file_stem(), candidate.extension()) {
        (false, Some(stem), Some(ext)) => (stem.to_os_string(), Some(ext.to_os_string())),
        _ => (
            candidate
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_default(),
            None,
        ),
    };

    let mut counter: u64 = 1;
    loop {
        let mut name = OsString::from(&stem);
        name.push(format!(".{counter}"));
        if let Some(ext) = &extension {
            name.push(".");
            name.push(ext);
        }
        let attempt = candidate.with_file_name(name);
        if !is_taken(&attempt) {
            log::debug!("PathUtils: {candidate:?} is taken, using {attempt:?} instead.");
            return attempt;
        }
        counter += 1;
    }
}
