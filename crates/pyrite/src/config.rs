//! Interpreter configuration.
//!
//! Settings are plain data with serde support so embedders can keep them in a TOML file:
//!
//! ```toml
//! recursion_limit = 500
//! deprecation_warnings = "error"
//! max_block_depth = 20
//! trace_opcodes = false
//! ```
//!
//! Every field has a default, so an empty document is a valid configuration.

use serde::{Deserialize, Serialize};

/// Smallest accepted recursion limit; below this even builtin calls through user hooks fail.
pub const MIN_RECURSION_LIMIT: usize = 10;

/// What to do with a warning such as the float-as-index deprecation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningPolicy {
    Ignore,
    /// Keep the warning on the `Vm` and log it.
    #[default]
    Record,
    /// Raise the warning as an exception.
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InterpreterConfig {
    /// Maximum frame depth before `RecursionError`.
    pub recursion_limit: usize,
    pub deprecation_warnings: WarningPolicy,
    /// Maximum number of nested loop/try blocks in one frame.
    pub max_block_depth: usize,
    /// Fire `TraceHook::on_line` before every instruction instead of once per line.
    pub trace_opcodes: bool,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            recursion_limit: 1000,
            deprecation_warnings: WarningPolicy::default(),
            max_block_depth: 20,
            trace_opcodes: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml_edit::de::Error),
    #[error("cannot serialize configuration: {0}")]
    Serialize(#[from] toml_edit::ser::Error),
    #[error("recursion_limit must be at least {MIN_RECURSION_LIMIT}, got {0}")]
    RecursionLimit(usize),
    #[error("max_block_depth must be at least 1")]
    BlockDepth,
}

impl InterpreterConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml_edit::de::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml_edit::ser::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recursion_limit < MIN_RECURSION_LIMIT {
            return Err(ConfigError::RecursionLimit(self.recursion_limit));
        }
        if self.max_block_depth == 0 {
            return Err(ConfigError::BlockDepth);
        }
        Ok(())
    }

    #[must_use]
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    #[must_use]
    pub fn with_deprecation_warnings(mut self, policy: WarningPolicy) -> Self {
        self.deprecation_warnings = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(InterpreterConfig::from_toml_str("").unwrap(), InterpreterConfig::default());
    }

    #[test]
    fn fields_parse() {
        let config = InterpreterConfig::from_toml_str(
            "recursion_limit = 50\ndeprecation_warnings = \"error\"\ntrace_opcodes = true\n",
        )
        .unwrap();
        assert_eq!(config.recursion_limit, 50);
        assert_eq!(config.deprecation_warnings, WarningPolicy::Error);
        assert!(config.trace_opcodes);
        assert_eq!(config.max_block_depth, 20);
    }

    #[test]
    fn unknown_keys_and_small_limits_are_rejected() {
        assert!(matches!(
            InterpreterConfig::from_toml_str("recursion_limt = 5"),
            Err(ConfigError::Parse(_))
        ));
        let err = InterpreterConfig::from_toml_str("recursion_limit = 3").unwrap_err();
        assert_eq!(err.to_string(), "recursion_limit must be at least 10, got 3");
    }

    #[test]
    fn serialized_form_parses_back() {
        let config = InterpreterConfig::default().with_deprecation_warnings(WarningPolicy::Ignore);
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("deprecation_warnings = \"ignore\""));
        assert_eq!(InterpreterConfig::from_toml_str(&text).unwrap(), config);
    }
}
