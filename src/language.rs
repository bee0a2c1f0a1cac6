//! Language registry
//!
//! Maps a language to the command template that runs a script written in
//! it. Built-in languages ship with the binary; user languages come from
//! the config file and from `~/.runpane/languages.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum LanguageError {
    #[error("Language with id {0} not found")]
    NotFound(u32),

    #[error("Cannot delete built-in language: {0}")]
    BuiltIn(String),

    #[error("A language named {0} already exists")]
    Duplicate(String),

    #[error("Failed to access language file: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse language file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize languages: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// A runnable language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    pub id: u32,
    pub name: String,
    /// File extension without the dot
    pub extension: String,
    /// Command template, `{file}` is replaced with the script path
    pub run_command: String,
    #[serde(default)]
    pub built_in: bool,
}

/// A language as written in config: no id yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageSpec {
    pub name: String,
    pub extension: String,
    pub run_command: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LanguageFile {
    #[serde(default)]
    languages: Vec<Language>,
}

const BUILTINS: &[(&str, &str, &str)] = &[
    ("Kotlin", "kts", "kotlinc -script {file}"),
    ("Swift", "swift", "swift {file}"),
    ("Python", "py", "python3 {file}"),
    ("Shell", "sh", "sh {file}"),
];

/// Id → language lookup
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    languages: BTreeMap<u32, Language>,
    next_id: u32,
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl LanguageRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            languages: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Registry seeded with the built-in languages
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for (name, extension, run_command) in BUILTINS {
            registry.insert_new(name, extension, run_command, true);
        }
        registry
    }

    fn insert_new(&mut self, name: &str, extension: &str, run_command: &str, built_in: bool) -> Language {
        let language = Language {
            id: self.next_id,
            name: name.to_string(),
            extension: extension.trim_start_matches('.').to_string(),
            run_command: run_command.to_string(),
            built_in,
        };
        self.next_id += 1;
        self.languages.insert(language.id, language.clone());
        language
    }

    /// Register a user language
    ///
    /// # Errors
    ///
    /// `Duplicate` if a language with the same name (any case) exists.
    pub fn add(&mut self, name: &str, extension: &str, run_command: &str) -> Result<Language, LanguageError> {
        if self.find_by_name(name).is_some() {
            return Err(LanguageError::Duplicate(name.to_string()));
        }
        Ok(self.insert_new(name, extension, run_command, false))
    }

    /// Add configured languages, skipping names that already exist
    pub fn extend_from_specs(&mut self, specs: &[LanguageSpec]) {
        for spec in specs {
            if let Err(e) = self.add(&spec.name, &spec.extension, &spec.run_command) {
                warn!("Skipping configured language: {}", e);
            }
        }
    }

    /// Remove a user language
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids, `BuiltIn` for built-in languages.
    pub fn remove(&mut self, id: u32) -> Result<Language, LanguageError> {
        let language = self.languages.get(&id).ok_or(LanguageError::NotFound(id))?;
        if language.built_in {
            return Err(LanguageError::BuiltIn(language.name.clone()));
        }
        self.languages.remove(&id).ok_or(LanguageError::NotFound(id))
    }

    pub fn get(&self, id: u32) -> Option<&Language> {
        self.languages.get(&id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Language> {
        self.languages
            .values()
            .find(|l| l.name.eq_ignore_ascii_case(name))
    }

    pub fn find_by_extension(&self, extension: &str) -> Option<&Language> {
        let extension = extension.trim_start_matches('.');
        self.languages
            .values()
            .find(|l| l.extension.eq_ignore_ascii_case(extension))
    }

    /// All languages in id order
    pub fn all(&self) -> Vec<&Language> {
        self.languages.values().collect()
    }

    /// Load user languages saved by `save_user_languages`. A missing file
    /// is not an error. Returns how many languages were added.
    ///
    /// Saved languages never replace registered ones: a name that already
    /// exists is skipped and a taken id is replaced with a fresh one.
    ///
    /// # Errors
    ///
    /// Read or parse failures.
    pub fn load_user_languages(&mut self, path: &Path) -> Result<usize, LanguageError> {
        if !path.exists() {
            return Ok(0);
        }
        let content = fs::read_to_string(path)?;
        let file: LanguageFile = toml::from_str(&content)?;
        let mut added = 0;

        for mut language in file.languages {
            if self.find_by_name(&language.name).is_some() {
                warn!("Skipping saved language {}: name already registered", language.name);
                continue;
            }
            if self.languages.contains_key(&language.id) {
                warn!(
                    "Saved language {} has taken id {}; using id {}",
                    language.name, language.id, self.next_id
                );
                language.id = self.next_id;
            }
            language.built_in = false;
            self.next_id = self.next_id.max(language.id.saturating_add(1));
            self.languages.insert(language.id, language);
            added += 1;
        }
        Ok(added)
    }

    /// Write all user languages to `path`
    ///
    /// # Errors
    ///
    /// Serialize or write failures.
    pub fn save_user_languages(&self, path: &Path) -> Result<(), LanguageError> {
        let file = LanguageFile {
            languages: self
                .languages
                .values()
                .filter(|l| !l.built_in)
                .cloned()
                .collect(),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(&file)?)?;
        Ok(())
    }
}
