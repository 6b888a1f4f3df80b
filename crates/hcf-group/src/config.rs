use serde::{Deserialize, Serialize};

use hcf_store::ContainerConfig;

use crate::error::{GroupError, GroupResult};

/// Settings for a [`Namespace`](crate::Namespace).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceConfig {
    /// Symbolic links followed per operation before giving up.
    pub max_symlink_hops: u32,
    /// Used for every file the namespace creates or opens.
    pub container: ContainerConfig,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            max_symlink_hops: 16,
            container: ContainerConfig::default(),
        }
    }
}

impl NamespaceConfig {
    pub fn from_toml_str(text: &str) -> GroupResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| GroupError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> GroupResult<()> {
        if self.max_symlink_hops == 0 {
            return Err(GroupError::Config("max_symlink_hops must be positive".into()));
        }
        self.container.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = NamespaceConfig::default();
        assert_eq!(c.max_symlink_hops, 16);
        assert_eq!(c.container, ContainerConfig::default());
    }

    #[test]
    fn parses_nested_tables() {
        let c = NamespaceConfig::from_toml_str(
            r#"
            max_symlink_hops = 4

            [container]
            heap_initial_size = 64

            [container.format]
            sym_leaf_k = 2
            "#,
        )
        .unwrap();
        assert_eq!(c.max_symlink_hops, 4);
        assert_eq!(c.container.heap_initial_size, 64);
        assert_eq!(c.container.format.sym_leaf_k, 2);
        assert_eq!(c.container.cache_max_entries, 1024);
    }

    #[test]
    fn rejects_zero_hops() {
        assert!(matches!(
            NamespaceConfig::from_toml_str("max_symlink_hops = 0"),
            Err(GroupError::Config(_))
        ));
    }

    #[test]
    fn container_errors_surface_as_store_errors() {
        let err = NamespaceConfig::from_toml_str("[container]\ncache_max_entries = 0").unwrap_err();
        assert!(matches!(err, GroupError::Store(_)));
    }
}
