use super::config::CategoryTable;
use super::models::MatchedEntry;
use glob::{MatchOptions, Pattern, PatternError};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/*
 * This module discovers companion files next to a primary media file. It
 * lists a source directory, tests every entry against the ordered category
 * table and returns the entries that belong to a category. It defines the
 * `PatternMatcherOperations` trait so the ledger can be driven by a test
 * double, and the concrete `CorePatternMatcher` backed by the `glob` crate.
 */

/*
 * Glob options shared by every pattern. Separators must be matched literally
 * and `*` never matches a leading dot, so hidden files are only picked up by
 * patterns that spell the dot out.
 */
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

#[derive(Debug)]
pub enum MatcherError {
    DirectoryUnreadable { directory: PathBuf, source: io::Error },
}

impl std::fmt::Display for MatcherError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatcherError::DirectoryUnreadable { directory, source } => {
                write!(f, "Directory {directory:?} cannot be listed: {source}")
            }
        }
    }
}

impl std::error::Error for MatcherError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MatcherError::DirectoryUnreadable { source, .. } => Some(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, MatcherError>;

/*
 * A single compiled pattern of a category. A trailing `/` restricts the
 * pattern to directories. A pattern with a separator in the middle reaches
 * into subdirectories instead of matching immediate entry names.
 */
#[derive(Debug, Clone)]
pub struct CategoryPattern {
    raw: String,
    glob: Pattern,
    directory_only: bool,
    nested: bool,
}

impl CategoryPattern {
    pub fn parse(raw: &str) -> std::result::Result<Self, PatternError> {
        let directory_only = raw.ends_with('/');
        let body = raw.trim_end_matches('/');
        let glob = Pattern::new(body)?;
        Ok(CategoryPattern {
            raw: raw.to_string(),
            glob,
            directory_only,
            nested: body.contains('/'),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_directory_only(&self) -> bool {
        self.directory_only
    }

    pub fn is_nested(&self) -> bool {
        self.nested
    }

    // Only meaningful for non-nested patterns.
    pub fn matches_name(&self, name: &str, is_dir: bool) -> bool {
        if self.directory_only && !is_dir {
            return false;
        }
        self.glob.matches_with(name, MATCH_OPTIONS)
    }

    /*
     * Expands a nested pattern below `directory`. Paths are matched relative
     * to `directory`, so the directory's own name never has to pass through
     * the pattern and may hold any bytes. Without `**` the walk stops at the
     * depth the pattern spells out.
     */
    fn expand_nested(&self, directory: &Path) -> Vec<(PathBuf, bool)> {
        let body = self.glob.as_str();
        let mut walker = WalkDir::new(directory).min_depth(1).sort_by_file_name();
        if !body.contains("**") {
            walker = walker.max_depth(body.split('/').count());
        }

        let mut found = Vec::new();
        for entry_result in walker {
            let entry = match entry_result {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!(
                        "PatternMatcher: Skipping unreadable path while expanding '{}': {e}",
                        self.raw
                    );
                    continue;
                }
            };
            let Ok(relative) = entry.path().strip_prefix(directory) else {
                continue;
            };
            if !self.glob.matches_path_with(relative, MATCH_OPTIONS) {
                continue;
            }
            let is_dir = entry.path().is_dir();
            if self.directory_only && !is_dir {
                continue;
            }
            found.push((entry.into_path(), is_dir));
        }
        found
    }
}

/*
 * Defines the companion discovery operation.
 * Implementations list `directory`, never recurse except where a nested
 * pattern asks for it, never return a path contained in `exclude`, and
 * attribute every entry to the first category (in declared order) that
 * matches it. They must not modify the file system.
 */
pub trait PatternMatcherOperations: Send + Sync {
    fn match_entries(
        &self,
        directory: &Path,
        categories: &CategoryTable,
        exclude: &HashSet<PathBuf>,
    ) -> Result<Vec<MatchedEntry>>;
}

pub struct CorePatternMatcher {}

impl CorePatternMatcher {
    pub fn new() -> Self {
        CorePatternMatcher {}
    }
}

impl Default for CorePatternMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternMatcherOperations for CorePatternMatcher {
    fn match_entries(
        &self,
        directory: &Path,
        categories: &CategoryTable,
        exclude: &HashSet<PathBuf>,
    ) -> Result<Vec<MatchedEntry>> {
        log::debug!("PatternMatcher: Scanning {directory:?} for companion files.");

        let read_dir = fs::read_dir(directory).map_err(|source| {
            MatcherError::DirectoryUnreadable {
                directory: directory.to_path_buf(),
                source,
            }
        })?;

        let mut immediate: Vec<(PathBuf, String, bool)> = Vec::new();
        for entry_result in read_dir {
            let entry = entry_result.map_err(|source| MatcherError::DirectoryUnreadable {
                directory: directory.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if exclude.contains(&path) {
                log::trace!("PatternMatcher: Skipping primary file {path:?}.");
                continue;
            }
            // Follows symlinks so a linked artwork folder still counts as a directory.
            let is_dir = path.is_dir();
            let name = entry.file_name().to_string_lossy().into_owned();
            immediate.push((path, name, is_dir));
        }
        immediate.sort_by(|a, b| a.0.cmp(&b.0));

        // BTreeMap keeps the result sorted by path and lets the first category claim an entry.
        let mut claimed: BTreeMap<PathBuf, MatchedEntry> = BTreeMap::new();
        for category in categories.iter() {
            for (path, name, is_dir) in &immediate {
                if claimed.contains_key(path) {
                    continue;
                }
                if category
                    .patterns
                    .iter()
                    .any(|p| !p.is_nested() && p.matches_name(name, *is_dir))
                {
                    log::trace!(
                        "PatternMatcher: {path:?} matched category '{}'.",
                        category.name
                    );
                    claimed.insert(
                        path.clone(),
                        MatchedEntry::new(path.clone(), category.name.clone(), *is_dir),
                    );
                }
            }

            for pattern in category.patterns.iter().filter(|p| p.is_nested()) {
                for (path, is_dir) in pattern.expand_nested(directory) {
                    if exclude.contains(&path) || claimed.contains_key(&path) {
                        continue;
                    }
                    claimed.insert(
                        path.clone(),
                        MatchedEntry::new(path, category.name.clone(), is_dir),
                    );
                }
            }
        }

        // A matched ancestor relocates the whole subtree, so its descendants drop out.
        let matched_dirs: Vec<PathBuf> = claimed
            .values()
            .filter(|m| m.is_dir)
            .map(|m| m.path.clone())
            .collect();
        let entries: Vec<MatchedEntry> = claimed
            .into_values()
            .filter(|m| {
                !matched_dirs
                    .iter()
                    .any(|dir| m.path != *dir && m.path.starts_with(dir))
            })
            .collect();

        log::debug!(
            "PatternMatcher: Found {} companion entries in {directory:?}.",
            entries.len()
        );
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CompanionConfig;
    use std::fs::{self, File};
    use tempfile::tempdir;

    fn table(patterns: &[(&str, Vec<&str>)]) -> CategoryTable {
        let mut config = CompanionConfig::default();
        for (name, globs) in patterns {
            config.patterns.push((
                name.to_string(),
                globs.iter().map(|g| g.to_string()).collect(),
            ));
        }
        config.validate().expect("test config should validate")
    }

    fn setup_album_dir(base_path: &Path) -> io::Result<()> {
        for name in ["file.mp3", "file.cue", "file.txt", "file.log"] {
            File::create(base_path.join(name))?.sync_all()?;
        }
        fs::create_dir_all(base_path.join("scans"))?;
        File::create(base_path.join("scans/front.jpg"))?.sync_all()?;
        File::create(base_path.join("scans/back.jpg"))?.sync_all()?;
        Ok(())
    }

    fn names(entries: &[MatchedEntry]) -> Vec<(String, String)> {
        entries
            .iter()
            .map(|e| (e.base_name().to_string_lossy().into_owned(), e.category.clone()))
            .collect()
    }

    #[test]
    fn test_matches_companions_by_category() -> io::Result<()> {
        // Arrange
        let dir = tempdir()?;
        setup_album_dir(dir.path())?;
        let categories = table(&[
            ("log", vec!["*.log"]),
            ("cue", vec!["*.cue"]),
            ("artwork", vec!["scans/", "Scans/", "artwork/", "Artwork/"]),
        ]);
        let exclude: HashSet<PathBuf> = [dir.path().join("file.mp3")].into_iter().collect();

        // Act
        let entries = CorePatternMatcher::new()
            .match_entries(dir.path(), &categories, &exclude)
            .unwrap();

        // Assert
        assert_eq!(
            names(&entries),
            vec![
                ("file.cue".to_string(), "cue".to_string()),
                ("file.log".to_string(), "log".to_string()),
                ("scans".to_string(), "artwork".to_string()),
            ]
        );
        let scans = entries.iter().find(|e| e.category == "artwork").unwrap();
        assert!(scans.is_dir);
        Ok(())
    }

    #[test]
    fn test_primary_file_is_never_its_own_companion() -> io::Result<()> {
        let dir = tempdir()?;
        setup_album_dir(dir.path())?;
        let categories = table(&[("everything", vec!["*"])]);
        let primary = dir.path().join("file.mp3");
        let exclude: HashSet<PathBuf> = [primary.clone()].into_iter().collect();

        let entries = CorePatternMatcher::new()
            .match_entries(dir.path(), &categories, &exclude)
            .unwrap();

        assert!(!entries.iter().any(|e| e.path == primary));
        assert_eq!(entries.len(), 4);
        Ok(())
    }

    #[test]
    fn test_first_declared_category_wins() -> io::Result<()> {
        let dir = tempdir()?;
        File::create(dir.path().join("rip.log"))?.sync_all()?;
        let categories = table(&[("first", vec!["rip.*"]), ("second", vec!["*.log"])]);

        let entries = CorePatternMatcher::new()
            .match_entries(dir.path(), &categories, &HashSet::new())
            .unwrap();

        assert_eq!(entries.len(), 1, "An entry must belong to one category only");
        assert_eq!(entries[0].category, "first");
        Ok(())
    }

    #[test]
    fn test_trailing_slash_matches_directories_only() -> io::Result<()> {
        let dir = tempdir()?;
        File::create(dir.path().join("scans"))?.sync_all()?; // a file named like the folder
        fs::create_dir_all(dir.path().join("artwork"))?;
        let categories = table(&[("artwork", vec!["scans/", "artwork/"])]);

        let entries = CorePatternMatcher::new()
            .match_entries(dir.path(), &categories, &HashSet::new())
            .unwrap();

        assert_eq!(names(&entries), vec![("artwork".to_string(), "artwork".to_string())]);
        Ok(())
    }

    #[test]
    fn test_plain_pattern_matches_files_and_directories() -> io::Result<()> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join("extras"))?;
        File::create(dir.path().join("extras.txt"))?.sync_all()?;
        let categories = table(&[("extras", vec!["extras*"])]);

        let entries = CorePatternMatcher::new()
            .match_entries(dir.path(), &categories, &HashSet::new())
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.is_dir && e.base_name() == "extras"));
        assert!(entries.iter().any(|e| !e.is_dir && e.base_name() == "extras.txt"));
        Ok(())
    }

    #[test]
    fn test_star_does_not_match_hidden_files() -> io::Result<()> {
        let dir = tempdir()?;
        File::create(dir.path().join(".hidden.log"))?.sync_all()?;
        File::create(dir.path().join("visible.log"))?.sync_all()?;
        let categories = table(&[("log", vec!["*.log"])]);

        let entries = CorePatternMatcher::new()
            .match_entries(dir.path(), &categories, &HashSet::new())
            .unwrap();

        assert_eq!(names(&entries), vec![("visible.log".to_string(), "log".to_string())]);
        Ok(())
    }

    #[test]
    fn test_nested_pattern_reaches_into_subdirectory() -> io::Result<()> {
        let dir = tempdir()?;
        setup_album_dir(dir.path())?;
        File::create(dir.path().join("scans/notes.txt"))?.sync_all()?;
        let categories = table(&[("covers", vec!["scans/*.jpg"])]);

        let entries = CorePatternMatcher::new()
            .match_entries(dir.path(), &categories, &HashSet::new())
            .unwrap();

        assert_eq!(
            names(&entries),
            vec![
                ("back.jpg".to_string(), "covers".to_string()),
                ("front.jpg".to_string(), "covers".to_string()),
            ]
        );
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_nested_pattern_in_non_utf8_directory() -> io::Result<()> {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        // Arrange
        let tmp = tempdir()?;
        let dir = tmp.path().join(OsStr::from_bytes(b"Disc\xff"));
        fs::create_dir_all(&dir)?;
        setup_album_dir(&dir)?;
        let categories = table(&[("covers", vec!["scans/*.jpg"])]);

        // Act
        let entries = CorePatternMatcher::new()
            .match_entries(&dir, &categories, &HashSet::new())
            .unwrap();

        // Assert
        let paths: Vec<PathBuf> = entries.iter().map(|e| e.path.clone()).collect();
        assert_eq!(
            paths,
            vec![dir.join("scans/back.jpg"), dir.join("scans/front.jpg")]
        );
        Ok(())
    }

    #[test]
    fn test_nested_match_inside_matched_directory_is_dropped() -> io::Result<()> {
        let dir = tempdir()?;
        setup_album_dir(dir.path())?;
        let categories = table(&[("covers", vec!["scans/*.jpg"]), ("artwork", vec!["scans/"])]);

        let entries = CorePatternMatcher::new()
            .match_entries(dir.path(), &categories, &HashSet::new())
            .unwrap();

        assert_eq!(names(&entries), vec![("scans".to_string(), "artwork".to_string())]);
        Ok(())
    }

    #[test]
    fn test_album_directory_with_glob_characters_is_escaped() -> io::Result<()> {
        let dir = tempdir()?;
        let album = dir.path().join("Best Of [Disc 1]");
        fs::create_dir_all(album.join("scans"))?;
        File::create(album.join("scans/front.jpg"))?.sync_all()?;
        let categories = table(&[("covers", vec!["scans/*.jpg"])]);

        let entries = CorePatternMatcher::new()
            .match_entries(&album, &categories, &HashSet::new())
            .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, album.join("scans/front.jpg"));
        Ok(())
    }

    #[test]
    fn test_unreadable_directory_is_reported() {
        let categories = table(&[("cue", vec!["*.cue"])]);
        let missing = Path::new("this_directory_was_already_moved_away");

        let result = CorePatternMatcher::new().match_entries(missing, &categories, &HashSet::new());

        assert!(matches!(
            result,
            Err(MatcherError::DirectoryUnreadable { .. })
        ));
    }

    #[test]
    fn test_category_pattern_parse_flags() {
        let dir_pattern = CategoryPattern::parse("Artwork/").unwrap();
        assert!(dir_pattern.is_directory_only());
        assert!(!dir_pattern.is_nested());
        assert!(dir_pattern.matches_name("Artwork", true));
        assert!(!dir_pattern.matches_name("Artwork", false));

        let nested = CategoryPattern::parse("scans/*.png").unwrap();
        assert!(nested.is_nested());
        assert!(!nested.is_directory_only());

        assert!(CategoryPattern::parse("[unclosed").is_err());
    }
}
