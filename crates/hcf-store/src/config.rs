use serde::{Deserialize, Serialize};

use hcf_types::FormatParams;

use crate::error::{StoreError, StoreResult};

/// Settings used when creating or opening a container.
///
/// `format` only applies at creation time; an existing container keeps the
/// parameters recorded in its superblock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub format: FormatParams,
    /// Maximum number of unprotected entries kept in the metadata cache.
    pub cache_max_entries: usize,
    /// Initial data size of a new group's local heap.
    pub heap_initial_size: usize,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            format: FormatParams::default(),
            cache_max_entries: 1024,
            heap_initial_size: 256,
        }
    }
}

impl ContainerConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> StoreResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> StoreResult<()> {
        self.format.validate()?;
        if self.cache_max_entries == 0 {
            return Err(StoreError::Config("cache_max_entries must be positive".into()));
        }
        if self.heap_initial_size == 0 {
            return Err(StoreError::Config("heap_initial_size must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hcf_types::ByteOrder;

    #[test]
    fn default_config() {
        let c = ContainerConfig::default();
        assert_eq!(c.cache_max_entries, 1024);
        assert_eq!(c.heap_initial_size, 256);
        assert_eq!(c.format, FormatParams::default());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn parses_toml_with_nested_format() {
        let c = ContainerConfig::from_toml_str(
            r#"
            cache_max_entries = 16

            [format]
            sym_leaf_k = 2
            sizeof_addr = 4
            byte_order = "big"
            "#,
        )
        .unwrap();
        assert_eq!(c.cache_max_entries, 16);
        assert_eq!(c.heap_initial_size, 256);
        assert_eq!(c.format.sym_leaf_k, 2);
        assert_eq!(c.format.sizeof_addr, 4);
        assert_eq!(c.format.byte_order, ByteOrder::Big);
    }

    #[test]
    fn rejects_bad_width() {
        let err = ContainerConfig::from_toml_str("[format]\nsizeof_size = 5").unwrap_err();
        assert!(matches!(err, StoreError::Codec(_)));
    }

    #[test]
    fn rejects_zero_cache() {
        assert!(matches!(
            ContainerConfig::from_toml_str("cache_max_entries = 0"),
            Err(StoreError::Config(_))
        ));
    }
}
