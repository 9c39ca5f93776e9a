use ini::{Ini, ParseOption};
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

/// Section name that never becomes an option profile (matched case-insensitively).
pub const DEFAULT_SECTION: &str = "default";

/// Flag that introduces every creation option on the conversion command line.
pub const CREATION_OPTION_FLAG: &str = "-co";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    Parse { path: String, message: String },

    #[error("section '{0}' is defined more than once")]
    DuplicateSection(String),

    #[error("option '{key}' is defined more than once in section '{section}'")]
    DuplicateKey { section: String, key: String },
}

/// One named compression profile and the creation arguments it expands to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionProfile {
    pub name: String,
    pub args: Vec<String>,
}

/// Ordered mapping from option name to creation arguments, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionSet {
    profiles: Vec<OptionProfile>,
}

impl OptionSet {
    /// Loads the option set from a sectioned key/value file.
    ///
    /// A missing file yields an empty set. Any other read failure or a
    /// malformed file is an error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "config file not found, no options loaded");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io { path: path.display().to_string(), source });
            }
        };

        Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    /// Parses the option set from the text of a configuration file.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        // Values are passed to the conversion utility verbatim.
        let opt = ParseOption {
            enabled_quote: false,
            enabled_escape: false,
            ..ParseOption::default()
        };
        let ini = Ini::load_from_str_opt(content, opt).map_err(|e| ConfigError::Parse {
            path: String::from("<string>"),
            message: e.to_string(),
        })?;

        // Keys of the default section are inherited by every profile.
        let mut defaults: Vec<(&str, &str)> = Vec::new();
        for (section, properties) in ini.iter() {
            match section {
                Some(section) if section.eq_ignore_ascii_case(DEFAULT_SECTION) => {
                    for (key, value) in properties.iter() {
                        defaults.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
                        defaults.push((key, value));
                    }
                }
                _ => {}
            }
        }

        let mut set = Self::default();
        for (section, properties) in ini.iter() {
            // Keys outside of any section belong to no profile.
            let Some(section) = section else { continue };
            if section.eq_ignore_ascii_case(DEFAULT_SECTION) {
                continue;
            }
            if set.get(section).is_some() {
                return Err(ConfigError::DuplicateSection(section.to_string()));
            }

            let mut own: Vec<(&str, &str)> = Vec::new();
            for (key, value) in properties.iter() {
                if own.iter().any(|(k, _)| k.eq_ignore_ascii_case(key)) {
                    return Err(ConfigError::DuplicateKey {
                        section: section.to_string(),
                        key: key.to_string(),
                    });
                }
                own.push((key, value));
            }

            let inherited = defaults
                .iter()
                .filter(|(key, _)| !own.iter().any(|(k, _)| k.eq_ignore_ascii_case(key)));

            let mut args = Vec::new();
            for (key, value) in inherited.chain(own.iter()) {
                args.push(CREATION_OPTION_FLAG.to_string());
                args.push(format!("{}={}", key.to_uppercase(), value));
            }

            set.profiles.push(OptionProfile { name: section.to_string(), args });
        }

        Ok(set)
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.profiles
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.args.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = &OptionProfile> {
        self.profiles.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.iter().map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
