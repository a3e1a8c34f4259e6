// Language profiles: how to compile and run source for each supported language.
// Adding a language means adding a profile, either here or in languages.json.

use crate::error::SandboxError;
use sandbox_common::config::CONTAINER_WORKDIR;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const SOURCE_PLACEHOLDER: &str = "{source}";
const WORKDIR_PLACEHOLDER: &str = "{workdir}";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LanguageProfile {
    pub name: String,
    pub image: String,
    pub source_file: String,
    /// Empty for interpreted languages
    #[serde(default)]
    pub compile: Vec<String>,
    pub run: Vec<String>,
}

impl LanguageProfile {
    /// In-container path of the source file
    pub fn source_path(&self) -> String {
        format!("{}/{}", CONTAINER_WORKDIR, self.source_file)
    }

    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.source_file)
            .extension()
            .and_then(|ext| ext.to_str())
    }

    pub fn compile_command(&self) -> Option<Vec<String>> {
        if self.compile.is_empty() {
            None
        } else {
            Some(self.expand(&self.compile))
        }
    }

    /// Run template followed by the whitespace-separated tokens of `input`
    pub fn run_command(&self, input: &str) -> Vec<String> {
        let mut argv = self.expand(&self.run);
        argv.extend(input.split_whitespace().map(str::to_string));
        argv
    }

    fn expand(&self, template: &[String]) -> Vec<String> {
        let source = self.source_path();
        template
            .iter()
            .map(|token| {
                token
                    .replace(SOURCE_PLACEHOLDER, &source)
                    .replace(WORKDIR_PLACEHOLDER, CONTAINER_WORKDIR)
            })
            .collect()
    }
}

fn argv(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| t.to_string()).collect()
}

#[derive(Debug, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageProfile>,
}

/// Registry of supported languages, keyed by lowercase name
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    profiles: HashMap<String, LanguageProfile>,
}

impl LanguageRegistry {
    /// Languages available without a configuration file
    pub fn builtin() -> Self {
        let profiles = vec![
            LanguageProfile {
                name: "c".to_string(),
                image: "gcc:latest".to_string(),
                source_file: "main.c".to_string(),
                compile: argv(&["gcc", "{source}", "-o", "{workdir}/a.out"]),
                run: argv(&["{workdir}/a.out"]),
            },
            LanguageProfile {
                name: "java".to_string(),
                image: "openjdk:8-alpine".to_string(),
                source_file: "Main.java".to_string(),
                compile: argv(&["javac", "-encoding", "UTF-8", "{source}"]),
                run: argv(&["java", "-cp", "{workdir}", "Main"]),
            },
        ];

        Self {
            profiles: profiles
                .into_iter()
                .map(|p| (p.name.to_lowercase(), p))
                .collect(),
        }
    }

    pub fn from_profiles(profiles: Vec<LanguageProfile>) -> Result<Self, SandboxError> {
        let mut map = HashMap::new();
        for profile in profiles {
            if profile.run.is_empty() {
                return Err(SandboxError::Config(format!(
                    "Language '{}' has an empty run command",
                    profile.name
                )));
            }
            if profile.source_file.trim().is_empty() || profile.image.trim().is_empty() {
                return Err(SandboxError::Config(format!(
                    "Language '{}' needs both an image and a source file name",
                    profile.name
                )));
            }
            let key = profile.name.trim().to_lowercase();
            if map.insert(key, profile.clone()).is_some() {
                return Err(SandboxError::Config(format!(
                    "Language '{}' is defined more than once",
                    profile.name
                )));
            }
        }

        if map.is_empty() {
            return Err(SandboxError::Config("No languages configured".to_string()));
        }

        Ok(Self { profiles: map })
    }

    /// Load profiles from a languages.json file
    pub fn load(config_path: &Path) -> Result<Self, SandboxError> {
        let content = fs::read_to_string(config_path).map_err(|e| {
            SandboxError::Config(format!("Failed to read {}: {}", config_path.display(), e))
        })?;

        let languages_json: LanguagesJson = serde_json::from_str(&content).map_err(|e| {
            SandboxError::Config(format!("Failed to parse {}: {}", config_path.display(), e))
        })?;

        Self::from_profiles(languages_json.languages)
    }

    /// Case-insensitive lookup
    pub fn resolve(&self, language: &str) -> Result<&LanguageProfile, SandboxError> {
        self.profiles
            .get(&language.trim().to_lowercase())
            .ok_or_else(|| SandboxError::UnsupportedLanguage(language.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.profiles.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn profiles(&self) -> impl Iterator<Item = &LanguageProfile> {
        self.profiles.values()
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
