/*
 * Manages the companion configuration: which categories exist, the glob
 * patterns that select their members and the optional destination template
 * for each. The configuration is read from a JSON file, validated exactly once
 * and turned into an immutable `CategoryTable` before any event is processed.
 *
 * It uses a trait-based approach (`ConfigManagerOperations`) to allow for
 * different storage backends or mock implementations for testing. The concrete
 * implementation (`CoreConfigManager`) reads and writes JSON files and locates
 * the default file through the shared path utilities.
 */
use super::destination::{PathTemplate, TemplateError};
use super::pattern_matcher::CategoryPattern;
use crate::core::path_utils;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = "companions.json";

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Serde(serde_json::Error),
    NoConfigDirectory,
    EmptyCategory(String),
    DuplicateCategory(String),
    UnknownCategory(String),
    InvalidPattern {
        category: String,
        pattern: String,
        source: glob::PatternError,
    },
    Template {
        category: String,
        source: TemplateError,
    },
}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Serde(err)
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Configuration I/O error: {e}"),
            ConfigError::Serde(e) => write!(f, "Configuration parse error: {e}"),
            ConfigError::NoConfigDirectory => {
                write!(f, "Could not determine the configuration directory")
            }
            ConfigError::EmptyCategory(name) => {
                write!(f, "Category '{name}' has no patterns")
            }
            ConfigError::DuplicateCategory(name) => {
                write!(f, "Category '{name}' is declared more than once")
            }
            ConfigError::UnknownCategory(name) => write!(
                f,
                "A destination path is configured for '{name}', which has no patterns"
            ),
            ConfigError::InvalidPattern {
                category,
                pattern,
                source,
            } => write!(
                f,
                "Invalid pattern '{pattern}' in category '{category}': {source}"
            ),
            ConfigError::Template { category, source } => {
                write!(f, "Invalid destination path for category '{category}': {source}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Serde(e) => Some(e),
            ConfigError::InvalidPattern { source, .. } => Some(source),
            ConfigError::Template { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/*
 * JSON objects are unordered maps in most deserializers, but category order
 * decides which category wins an entry. This helper reads an object into a
 * vector of pairs, keeping the order in which keys appear in the file.
 */
mod ordered_map {
    use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
    use serde::ser::{Serialize, SerializeMap, Serializer};
    use std::fmt;
    use std::marker::PhantomData;

    #[allow(clippy::ptr_arg)]
    pub fn serialize<S, V>(pairs: &Vec<(String, V)>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        V: Serialize,
    {
        let mut map = serializer.serialize_map(Some(pairs.len()))?;
        for (key, value) in pairs {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D, V>(deserializer: D) -> Result<Vec<(String, V)>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        struct PairsVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for PairsVisitor<V> {
            type Value = Vec<(String, V)>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of category names")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut pairs = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    pairs.push((key, value));
                }
                Ok(pairs)
            }
        }

        deserializer.deserialize_map(PairsVisitor(PhantomData))
    }
}

// Raw configuration as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanionConfig {
    #[serde(default, with = "ordered_map")]
    pub patterns: Vec<(String, Vec<String>)>,
    #[serde(default, with = "ordered_map")]
    pub paths: Vec<(String, String)>,
}

impl CompanionConfig {
    /*
     * Compiles every pattern and template and checks that categories are
     * unique, non-empty and that each destination path refers to a known
     * category. The first problem found is returned.
     */
    pub fn validate(&self) -> Result<CategoryTable> {
        let mut categories: Vec<Category> = Vec::with_capacity(self.patterns.len());

        for (name, raw_patterns) in &self.patterns {
            if categories.iter().any(|c| &c.name == name) {
                return Err(ConfigError::DuplicateCategory(name.clone()));
            }
            if raw_patterns.is_empty() {
                return Err(ConfigError::EmptyCategory(name.clone()));
            }

            let mut patterns = Vec::with_capacity(raw_patterns.len());
            for raw in raw_patterns {
                let pattern =
                    CategoryPattern::parse(raw).map_err(|source| ConfigError::InvalidPattern {
                        category: name.clone(),
                        pattern: raw.clone(),
                        source,
                    })?;
                patterns.push(pattern);
            }

            categories.push(Category {
                name: name.clone(),
                patterns,
                template: None,
            });
        }

        for (name, template) in &self.paths {
            let category = categories
                .iter_mut()
                .find(|c| &c.name == name)
                .ok_or_else(|| ConfigError::UnknownCategory(name.clone()))?;
            let parsed = PathTemplate::parse(template).map_err(|source| ConfigError::Template {
                category: name.clone(),
                source,
            })?;
            category.template = Some(parsed);
        }

        log::debug!(
            "CompanionConfig: Validated {} categories ({} with destination paths).",
            categories.len(),
            categories.iter().filter(|c| c.template.is_some()).count()
        );
        Ok(CategoryTable { categories })
    }
}

#[derive(Debug, Clone)]
pub struct Category {
    pub name: String,
    pub patterns: Vec<CategoryPattern>,
    pub template: Option<PathTemplate>,
}

/*
 * The validated, ordered rule table. Declaration order is significant: when
 * an entry could belong to several categories the first one wins.
 */
#[derive(Debug, Clone, Default)]
pub struct CategoryTable {
    categories: Vec<Category>,
}

impl CategoryTable {
    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.categories.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

pub trait ConfigManagerOperations: Send + Sync {
    fn load_config(&self, path: &Path) -> Result<CompanionConfig>;
    fn save_config(&self, path: &Path, config: &CompanionConfig) -> Result<()>;
    fn default_config_path(&self, app_name: &str) -> Result<PathBuf>;

    // Loading and validation together; what a host calls once at startup.
    fn load_categories(&self, path: &Path) -> Result<CategoryTable> {
        self.load_config(path)?.validate()
    }
}

pub struct CoreConfigManager {}

impl CoreConfigManager {
    pub fn new() -> Self {
        CoreConfigManager {}
    }
}

impl Default for CoreConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigManagerOperations for CoreConfigManager {
    fn load_config(&self, path: &Path) -> Result<CompanionConfig> {
        log::trace!("CoreConfigManager: Loading configuration from {path:?}");
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config: CompanionConfig = serde_json::from_reader(reader)?;
        log::debug!(
            "CoreConfigManager: Loaded {} categories from {path:?}.",
            config.patterns.len()
        );
        Ok(config)
    }

    fn save_config(&self, path: &Path, config: &CompanionConfig) -> Result<()> {
        log::trace!("CoreConfigManager: Saving configuration to {path:?}");
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, config)?;
        writer.flush()?;
        log::debug!("CoreConfigManager: Saved configuration to {path:?}.");
        Ok(())
    }

    /*
     * Returns `<local config dir>/companions.json`. The directory is created
     * if it does not exist yet; the file itself is not.
     */
    fn default_config_path(&self, app_name: &str) -> Result<PathBuf> {
        let config_dir = path_utils::get_base_app_config_local_dir(app_name)
            .ok_or(ConfigError::NoConfigDirectory)?;
        Ok(config_dir.join(CONFIG_FILENAME))
    }
}
