// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration of the call-graph evaluation stack.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of records the stack can hold, root included.
pub const DEFAULT_STACK_CAPACITY: usize = 1024;
/// Largest capacity a configuration may ask for; the store is reserved up front.
pub const MAX_STACK_CAPACITY: usize = 1 << 20;
/// Default per-record reference ceiling.
pub const DEFAULT_REF_LIMIT: u32 = 1000;
/// Default number of memoization slots per function call.
pub const DEFAULT_MAX_DATA_SLOTS: usize = 128;
/// Default number of cached parameter chips per function call.
pub const DEFAULT_MAX_PARAMETER_SLOTS: usize = 16;

/// Sizing and limits of a [`FunctionStack`](crate::stack::FunctionStack).
///
/// Missing fields fall back to their defaults when deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Fixed number of records, the root sentinel included.
    pub capacity: usize,
    /// Number of references a record accepts beyond the one it is created with.
    pub ref_limit: u32,
    /// Maximum memoization slot id (exclusive).
    pub max_data_slots: usize,
    /// Maximum parameter slot id (exclusive).
    pub max_parameter_slots: usize,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_STACK_CAPACITY,
            ref_limit: DEFAULT_REF_LIMIT,
            max_data_slots: DEFAULT_MAX_DATA_SLOTS,
            max_parameter_slots: DEFAULT_MAX_PARAMETER_SLOTS,
        }
    }
}

impl StackConfig {
    /// Returns a copy of this configuration with a different capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Returns a copy of this configuration with a different reference ceiling.
    pub fn with_ref_limit(mut self, ref_limit: u32) -> Self {
        self.ref_limit = ref_limit;
        self
    }

    /// Checks that the configuration describes a usable stack.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity < 2 {
            return Err(ConfigError::Invalid(format!(
                "capacity must hold the root and at least one call, got {}",
                self.capacity
            )));
        }
        if self.capacity > MAX_STACK_CAPACITY {
            return Err(ConfigError::Invalid(format!(
                "capacity must not exceed {MAX_STACK_CAPACITY}, got {}",
                self.capacity
            )));
        }
        if self.ref_limit == 0 {
            return Err(ConfigError::Invalid("ref_limit must be non-zero".into()));
        }
        Ok(())
    }

    /// Parses and validates a configuration written in RON.
    pub fn from_ron_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self =
            ron::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates a configuration written in JSON.
    pub fn from_json_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// An error raised while reading a [`StackConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The source text could not be deserialized.
    Parse(String),
    /// The values were read but do not describe a usable stack.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(msg) => write!(f, "Failed to parse stack configuration: {msg}"),
            ConfigError::Invalid(msg) => write!(f, "Invalid stack configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StackConfig::default();
        assert_eq!(config.capacity, 1024);
        assert_eq!(config.ref_limit, 1000);
        assert_eq!(config.max_data_slots, 128);
        assert_eq!(config.max_parameter_slots, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_ron_uses_defaults() {
        let config = StackConfig::from_ron_str("(capacity: 64)").unwrap();
        assert_eq!(config.capacity, 64);
        assert_eq!(config.ref_limit, DEFAULT_REF_LIMIT);
    }

    #[test]
    fn test_json_source() {
        let config = StackConfig::from_json_str(r#"{ "ref_limit": 12 }"#).unwrap();
        assert_eq!(config.ref_limit, 12);
        assert_eq!(config.capacity, DEFAULT_STACK_CAPACITY);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = StackConfig::from_ron_str("(capacity: 1)").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = StackConfig::from_json_str("{ nope").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().starts_with("Failed to parse stack configuration"));
    }

    #[test]
    fn test_oversized_capacity_is_rejected() {
        let err = StackConfig::from_ron_str("(capacity: 100000000000000)").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("must not exceed"));

        let err = StackConfig::from_json_str(r#"{ "capacity": 4294967296 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let largest = StackConfig::default().with_capacity(MAX_STACK_CAPACITY);
        assert!(largest.validate().is_ok());
        assert!(largest.with_capacity(MAX_STACK_CAPACITY + 1).validate().is_err());
    }
}
