//! Persona context.
//!
//! The persona is the person the chatbot speaks as: a name, a free-text
//! summary and a longer free-text background (typically an exported
//! professional profile). Sources may fail; callers fall back to generic
//! prompts when they do.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading a persona profile.
#[derive(Error, Debug)]
pub enum PersonaError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse persona YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Persona field '{0}' is missing or empty")]
    MissingField(&'static str),

    #[error("Persona load did not complete: {0}")]
    Interrupted(String),
}

/// Data used to fill the persona prompt templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaProfile {
    /// Display name, e.g. "Ada Lovelace".
    pub name: String,

    /// Short summary written by the persona.
    #[serde(default)]
    pub summary: String,

    /// Longer background text.
    #[serde(default)]
    pub background: String,
}

impl PersonaProfile {
    pub fn new(
        name: impl Into<String>,
        summary: impl Into<String>,
        background: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            summary: summary.into(),
            background: background.into(),
        }
    }

    /// Load a profile from YAML (`name`, `summary`, `background`).
    pub fn from_yaml(yaml: &str) -> Result<Self, PersonaError> {
        let profile: Self = serde_yaml::from_str(yaml)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<(), PersonaError> {
        if self.name.trim().is_empty() {
            return Err(PersonaError::MissingField("name"));
        }
        Ok(())
    }
}

/// Anything that can produce a persona profile.
///
/// `load` may block on file IO; async callers run it off the executor.
pub trait PersonaSource: Send + Sync {
    fn load(&self) -> Result<PersonaProfile, PersonaError>;
}

/// A fixed, in-memory profile.
#[derive(Debug, Clone)]
pub struct StaticPersona {
    profile: PersonaProfile,
}

impl StaticPersona {
    pub fn new(profile: PersonaProfile) -> Self {
        Self { profile }
    }
}

impl PersonaSource for StaticPersona {
    fn load(&self) -> Result<PersonaProfile, PersonaError> {
        self.profile.validate()?;
        Ok(self.profile.clone())
    }
}

/// Reads summary and background from text files on every load.
#[derive(Debug, Clone)]
pub struct FilePersonaSource {
    name: String,
    summary_path: PathBuf,
    background_path: Option<PathBuf>,
}

impl FilePersonaSource {
    pub fn new(name: impl Into<String>, summary_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            summary_path: summary_path.into(),
            background_path: None,
        }
    }

    pub fn with_background(mut self, path: impl Into<PathBuf>) -> Self {
        self.background_path = Some(path.into());
        self
    }

    fn read(path: &Path) -> Result<String, PersonaError> {
        std::fs::read_to_string(path)
            .map(|text| text.trim().to_string())
            .map_err(|source| PersonaError::Io {
                path: path.to_path_buf(),
                source,
            })
    }
}

impl PersonaSource for FilePersonaSource {
    fn load(&self) -> Result<PersonaProfile, PersonaError> {
        let summary = Self::read(&self.summary_path)?;
        let background = match &self.background_path {
            Some(path) => Self::read(path)?,
            None => String::new(),
        };

        let profile = PersonaProfile::new(self.name.clone(), summary, background);
        profile.validate()?;

        tracing::debug!(
            name = %profile.name,
            summary_chars = profile.summary.len(),
            background_chars = profile.background.len(),
            "Loaded persona profile"
        );
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("doppel-persona-{}-{}", std::process::id(), name));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_static_persona_loads() {
        let source = StaticPersona::new(PersonaProfile::new("Ada", "Mathematician", ""));
        assert_eq!(source.load().unwrap().name, "Ada");
    }

    #[test]
    fn test_static_persona_requires_name() {
        let source = StaticPersona::new(PersonaProfile::new("  ", "", ""));
        assert!(matches!(source.load(), Err(PersonaError::MissingField("name"))));
    }

    #[test]
    fn test_file_persona_trims_contents() {
        let summary = temp_file("summary.txt", "\n  I build engines.  \n");
        let background = temp_file("background.txt", "Analytical Engine notes");

        let profile = FilePersonaSource::new("Ada", &summary)
            .with_background(&background)
            .load()
            .unwrap();

        assert_eq!(profile.summary, "I build engines.");
        assert_eq!(profile.background, "Analytical Engine notes");

        std::fs::remove_file(summary).ok();
        std::fs::remove_file(background).ok();
    }

    #[test]
    fn test_file_persona_missing_file() {
        let source = FilePersonaSource::new("Ada", "/nonexistent/doppel/summary.txt");
        match source.load() {
            Err(PersonaError::Io { path, .. }) => {
                assert!(path.ends_with("summary.txt"));
            }
            other => panic!("expected io error, got {:?}", other),
        }
    }

    #[test]
    fn test_profile_from_yaml() {
        let yaml = "name: Ada\nsummary: Mathematician\n";
        let profile = PersonaProfile::from_yaml(yaml).unwrap();
        assert_eq!(profile.summary, "Mathematician");
        assert!(profile.background.is_empty());
    }

    #[test]
    fn test_profile_from_yaml_missing_name() {
        assert!(PersonaProfile::from_yaml("summary: x\n").is_err());
    }
}
