use async_trait::async_trait;
use dotenvy::dotenv;
use regex::{Captures, Regex};
use serde::de::DeserializeOwned;
use std::sync::LazyLock;
use std::{env, fs};
use thiserror::Error;

static VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([a-zA-Z_][0-9a-zA-Z_]*)\}").expect("static pattern"));

#[allow(clippy::enum_variant_names)]
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
    #[error("Error loading config: {0}")]
    ConfigError(String),
}

/// A config type that can be read from its section of a TOML file.
#[async_trait]
pub trait SectionLoader {
    type SectionType;

    async fn load_section_from_file(file_name: String) -> Result<Self::SectionType, LoadConfigError>;
}

pub trait SectionLoaderSync {
    type SectionType;

    fn load_section_from_file_sync(file_name: String) -> Result<Self::SectionType, LoadConfigError>;
}

pub async fn load_from_file<T: DeserializeOwned>(file_name: String) -> Result<T, LoadConfigError> {
    dotenv().ok();
    let contents = tokio::fs::read_to_string(file_name).await?;
    parse_toml(&contents)
}

pub fn load_from_file_sync<T: DeserializeOwned>(file_name: String) -> Result<T, LoadConfigError> {
    dotenv().ok();
    let contents = fs::read_to_string(file_name)?;
    parse_toml(&contents)
}

/// Parse TOML after substituting `${VAR}` references from the environment.
pub fn parse_toml<T: DeserializeOwned>(raw_config: &str) -> Result<T, LoadConfigError> {
    let contents = expand_vars(raw_config);
    Ok(toml::from_str(&contents)?)
}

// Unset variables are left as written.
fn expand_vars(raw_config: &str) -> String {
    VAR_PATTERN
        .replace_all(raw_config, |caps: &Captures| match env::var(&caps[1]) {
            Ok(val) => val,
            Err(_) => caps[0].to_string(),
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Sample {
        path: String,
    }

    #[test]
    fn test_expand_vars_keeps_unset() {
        let raw = "path = \"${COLLECTION_FEED_SURELY_UNSET_VAR}/state.json\"";
        assert_eq!(expand_vars(raw), raw);
    }

    #[test]
    fn test_expand_vars_substitutes_set() {
        // PATH is set in every test environment.
        let path = env::var("PATH").unwrap();
        let sample: Sample = parse_toml("path = \"${PATH}\"").unwrap();
        assert_eq!(sample.path, path);
    }

    #[test]
    fn test_parse_error() {
        let result: Result<Sample, _> = parse_toml("path = ");
        assert!(matches!(result, Err(LoadConfigError::TomlError(_))));
    }
}
