use crate::{DEFAULT_DATABASE_NAME, Encoding, OpenFlags};
use serde::{Deserialize, Serialize};

/// Defaults an [`Environment`](crate::Environment) applies to handle opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Name reported by handles opened without a name.
    pub default_name: String,
    /// Flags used when an open request does not give any.
    pub default_flags: OpenFlags,
    /// Encoding used when an open request does not give one.
    pub default_encoding: Encoding,
    /// Closed instance slots kept per database name for reuse. `0` disables
    /// recycling.
    pub pool_capacity: usize,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            default_name: DEFAULT_DATABASE_NAME.to_string(),
            default_flags: OpenFlags::empty(),
            default_encoding: Encoding::Utf8,
            pool_capacity: 16,
        }
    }
}

impl EnvironmentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_name(mut self, name: &str) -> Self {
        self.default_name = name.to_string();
        self
    }

    pub fn default_flags(mut self, flags: OpenFlags) -> Self {
        self.default_flags = flags;
        self
    }

    pub fn default_encoding(mut self, encoding: Encoding) -> Self {
        self.default_encoding = encoding;
        self
    }

    pub fn pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EnvironmentConfig::default();
        assert_eq!(config.default_name, "master");
        assert_eq!(config.default_flags, OpenFlags::empty());
        assert_eq!(config.default_encoding, Encoding::Utf8);
    }

    #[test]
    fn test_partial_config_from_json() {
        let config: EnvironmentConfig =
            serde_json::from_str(r#"{ "default_encoding": "utf16-le", "pool_capacity": 0 }"#)
                .unwrap();
        assert_eq!(config.default_encoding, Encoding::Utf16Le);
        assert_eq!(config.pool_capacity, 0);
        assert_eq!(config.default_name, "master");
    }
}
