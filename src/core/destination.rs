/*
 * Computes where a companion belongs once its primary file has been moved or
 * copied. Destination templates are parsed once, at configuration validation,
 * into a list of literal and placeholder segments; rendering a parsed template
 * therefore cannot fail.
 *
 * Placeholders use `$name` or `${name}`; `$$` is a literal dollar sign.
 *   $albumpath  containing directory of the primary destination
 *   $stem       file stem of the primary destination
 *   $extension  extension of the primary destination, without the dot
 *   $basename   base name of the matched companion
 *   $filename   base name of the matched companion without its extension
 */
use super::config::Category;
use super::models::MatchedEntry;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    UnresolvedVariable(String),
    Malformed { template: String, reason: String },
}

impl std::fmt::Display for TemplateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateError::UnresolvedVariable(name) => write!(
                f,
                "Unknown placeholder ${name}; expected one of {}",
                Placeholder::ALL
                    .iter()
                    .map(|p| format!("${}", p.name()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            TemplateError::Malformed { template, reason } => {
                write!(f, "Malformed template '{template}': {reason}")
            }
        }
    }
}

impl std::error::Error for TemplateError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    AlbumPath,
    Stem,
    Extension,
    BaseName,
    FileName,
}

impl Placeholder {
    pub const ALL: [Placeholder; 5] = [
        Placeholder::AlbumPath,
        Placeholder::Stem,
        Placeholder::Extension,
        Placeholder::BaseName,
        Placeholder::FileName,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Placeholder::AlbumPath => "albumpath",
            Placeholder::Stem => "stem",
            Placeholder::Extension => "extension",
            Placeholder::BaseName => "basename",
            Placeholder::FileName => "filename",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Placeholder::ALL.into_iter().find(|p| p.name() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(Placeholder),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '$' {
                literal.push(c);
                continue;
            }

            let name = match chars.peek().copied() {
                Some('$') => {
                    chars.next();
                    literal.push('$');
                    continue;
                }
                Some('{') => {
                    chars.next();
                    let mut name = String::new();
                    let mut closed = false;
                    for inner in chars.by_ref() {
                        if inner == '}' {
                            closed = true;
                            break;
                        }
                        name.push(inner);
                    }
                    if !closed {
                        return Err(TemplateError::Malformed {
                            template: template.to_string(),
                            reason: "unterminated ${".to_string(),
                        });
                    }
                    name
                }
                _ => {
                    let mut name = String::new();
                    while let Some(&next) = chars.peek() {
                        if next.is_ascii_alphanumeric() || next == '_' {
                            name.push(next);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    name
                }
            };

            if name.is_empty() {
                return Err(TemplateError::Malformed {
                    template: template.to_string(),
                    reason: "'$' must be followed by a placeholder name or another '$'"
                        .to_string(),
                });
            }
            let placeholder =
                Placeholder::from_name(&name).ok_or(TemplateError::UnresolvedVariable(name))?;
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Variable(placeholder));
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(PathTemplate {
            source: template.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /*
     * Renders into an `OsString` so that placeholder values taken from paths
     * keep their exact bytes, even when they are not valid UTF-8.
     */
    pub fn render(&self, bindings: &TemplateBindings) -> OsString {
        let mut rendered = OsString::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => rendered.push(text),
                Segment::Variable(placeholder) => rendered.push(bindings.value(*placeholder)),
            }
        }
        rendered
    }
}

// Values bound to the placeholders for one companion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateBindings {
    pub album_path: OsString,
    pub stem: OsString,
    pub extension: OsString,
    pub base_name: OsString,
    pub file_name: OsString,
}

impl TemplateBindings {
    pub fn new(entry: &MatchedEntry, primary_destination: &Path) -> Self {
        let base_name = entry.base_name();
        let file_name = if entry.is_dir {
            base_name
        } else {
            Path::new(base_name).file_stem().unwrap_or(base_name)
        };

        TemplateBindings {
            album_path: album_directory(primary_destination).as_os_str().to_os_string(),
            stem: primary_destination
                .file_stem()
                .map(OsStr::to_os_string)
                .unwrap_or_default(),
            extension: primary_destination
                .extension()
                .map(OsStr::to_os_string)
                .unwrap_or_default(),
            base_name: base_name.to_os_string(),
            file_name: file_name.to_os_string(),
        }
    }

    fn value(&self, placeholder: Placeholder) -> &OsStr {
        match placeholder {
            Placeholder::AlbumPath => &self.album_path,
            Placeholder::Stem => &self.stem,
            Placeholder::Extension => &self.extension,
            Placeholder::BaseName => &self.base_name,
            Placeholder::FileName => &self.file_name,
        }
    }
}

fn album_directory(primary_destination: &Path) -> &Path {
    primary_destination.parent().unwrap_or(Path::new(""))
}

/*
 * Resolves the destination of a matched companion.
 *
 * Without a template the entry keeps its name and lands next to the primary
 * destination. With a template, the rendered text names the target without
 * the companion's extension: files get their original extension appended
 * unless the rendered name already carries it, directories are used as
 * rendered. A relative result is placed under the album directory.
 */
pub struct DestinationResolver;

impl DestinationResolver {
    pub fn resolve(category: &Category, entry: &MatchedEntry, primary_destination: &Path) -> PathBuf {
        let album_path = album_directory(primary_destination);

        let Some(template) = &category.template else {
            return album_path.join(entry.base_name());
        };

        let bindings = TemplateBindings::new(entry, primary_destination);
        let mut rendered = template.render(&bindings);

        if !entry.is_dir {
            if let Some(extension) = entry.path.extension() {
                let mut suffix = OsString::from(".");
                suffix.push(extension);
                if !rendered
                    .as_encoded_bytes()
                    .ends_with(suffix.as_encoded_bytes())
                {
                    rendered.push(&suffix);
                }
            }
        }

        let rendered_path = PathBuf::from(rendered);
        let destination = if rendered_path.is_absolute() {
            rendered_path
        } else {
            album_path.join(rendered_path)
        };
        log::trace!(
            "DestinationResolver: '{}' rendered {:?} -> {destination:?}",
            template.as_str(),
            entry.path
        );
        destination
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pattern_matcher::CategoryPattern;

    fn category(template: Option<&str>) -> Category {
        Category {
            name: "test".to_string(),
            patterns: vec![CategoryPattern::parse("*").unwrap()],
            template: template.map(|t| PathTemplate::parse(t).unwrap()),
        }
    }

    fn file_entry(path: &str) -> MatchedEntry {
        MatchedEntry::new(PathBuf::from(path), "test", false)
    }

    #[test]
    fn test_no_template_mirrors_name_next_to_primary() {
        let dest = DestinationResolver::resolve(
            &category(None),
            &file_entry("/src/album/file.cue"),
            Path::new("/dst/album/file.mp3"),
        );
        assert_eq!(dest, PathBuf::from("/dst/album/file.cue"));
    }

    #[test]
    fn test_template_appends_original_extension() {
        let dest = DestinationResolver::resolve(
            &category(Some("$albumpath/audio")),
            &file_entry("/src/album/file.log"),
            Path::new("/dst/album/moved_file.mp3"),
        );
        assert_eq!(dest, PathBuf::from("/dst/album/audio.log"));
    }

    #[test]
    fn test_template_with_basename_keeps_single_extension() {
        let dest = DestinationResolver::resolve(
            &category(Some("$albumpath/audio/$basename")),
            &file_entry("/src/album/file.log"),
            Path::new("/dst/album/file.mp3"),
        );
        assert_eq!(dest, PathBuf::from("/dst/album/audio/file.log"));
    }

    #[test]
    fn test_directory_entry_uses_rendered_path_as_is() {
        let entry = MatchedEntry::new(PathBuf::from("/src/album/scans"), "test", true);
        let dest = DestinationResolver::resolve(
            &category(Some("${albumpath}/artwork")),
            &entry,
            Path::new("/dst/album/file.mp3"),
        );
        assert_eq!(dest, PathBuf::from("/dst/album/artwork"));
    }

    #[test]
    fn test_relative_template_is_placed_under_album_path() {
        let dest = DestinationResolver::resolve(
            &category(Some("extras/${stem}-$filename")),
            &file_entry("/src/album/rip.log"),
            Path::new("/dst/album/track01.flac"),
        );
        assert_eq!(dest, PathBuf::from("/dst/album/extras/track01-rip.log"));
    }

    #[test]
    fn test_extension_placeholder_and_literal_dollar() {
        let dest = DestinationResolver::resolve(
            &category(Some("$albumpath/$$$extension-notes")),
            &file_entry("/src/album/notes.txt"),
            Path::new("/dst/album/track.flac"),
        );
        assert_eq!(dest, PathBuf::from("/dst/album/$flac-notes.txt"));
    }

    #[test]
    fn test_unknown_placeholder_is_rejected() {
        let result = PathTemplate::parse("$albumpath/$artist");
        assert_eq!(
            result,
            Err(TemplateError::UnresolvedVariable("artist".to_string()))
        );
    }

    #[test]
    fn test_malformed_templates_are_rejected() {
        assert!(matches!(
            PathTemplate::parse("${albumpath/artwork"),
            Err(TemplateError::Malformed { .. })
        ));
        assert!(matches!(
            PathTemplate::parse("$albumpath/$/artwork"),
            Err(TemplateError::Malformed { .. })
        ));
    }

    #[test]
    fn test_bindings_for_directory_keep_full_name() {
        let entry = MatchedEntry::new(PathBuf::from("/src/album/Disc.1"), "test", true);
        let bindings = TemplateBindings::new(&entry, Path::new("/dst/album/a.mp3"));
        assert_eq!(bindings.file_name, "Disc.1");
        assert_eq!(bindings.base_name, "Disc.1");
        assert_eq!(bindings.stem, "a");
        assert_eq!(bindings.extension, "mp3");
        assert_eq!(bindings.album_path, "/dst/album");
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_album_path_is_kept_byte_for_byte() {
        use std::os::unix::ffi::OsStrExt;

        // Arrange
        let album = Path::new("/dst").join(OsStr::from_bytes(b"Caf\xE9"));
        let primary = album.join("file.mp3");
        let scans = MatchedEntry::new(PathBuf::from("/src/album/scans"), "test", true);
        let log = file_entry("/src/album/file.log");

        // Act
        let artwork = DestinationResolver::resolve(
            &category(Some("$albumpath/artwork")),
            &scans,
            &primary,
        );
        let audio = DestinationResolver::resolve(
            &category(Some("$albumpath/audio/$basename")),
            &log,
            &primary,
        );

        // Assert
        assert_eq!(artwork, album.join("artwork"));
        assert_eq!(audio, album.join("audio").join("file.log"));
    }
}
