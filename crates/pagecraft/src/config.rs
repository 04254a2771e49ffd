use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use generator_api::ProviderConfig;
use object_store::ObjectStoreConfig;
use serde::{Deserialize, Serialize};

/// Top-level configuration, loaded once at startup.
///
/// Mirrors the teacher's flat `Config` struct, but the Telegram-specific
/// fields (`allowed_users`, `db_path`, `sd_api_url`) are replaced with this
/// domain's provider/storage surface.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PagecraftConfig {
    /// Key into `providers` selecting the active generator.
    pub active_provider: String,
    pub providers: HashMap<String, ProviderConfig>,
    pub object_store: StorageConfig,
    #[serde(default)]
    pub templates: TemplateConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StorageConfig {
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    #[serde(default)]
    pub public_domain: Option<String>,
}

impl From<StorageConfig> for ObjectStoreConfig {
    fn from(config: StorageConfig) -> Self {
        ObjectStoreConfig {
            endpoint_url: config.endpoint_url,
            access_key_id: config.access_key_id,
            secret_access_key: config.secret_access_key,
            bucket: config.bucket,
            public_domain: config.public_domain,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TemplateConfig {
    pub full_path: Option<PathBuf>,
    pub short_path: Option<PathBuf>,
}

impl PagecraftConfig {
    /// Merges `/etc/pagecraft/config.toml`, the `--config` file, then
    /// `PAGECRAFT_`-prefixed environment variables, in that order of
    /// increasing precedence — exactly the teacher's `Figment` chain.
    pub fn load(path: &PathBuf) -> anyhow::Result<Self> {
        Figment::new()
            .merge(Toml::file("/etc/pagecraft/config.toml"))
            .merge(Toml::file(path))
            .merge(Env::prefixed("PAGECRAFT_"))
            .extract()
            .context("invalid configuration")
    }

    pub fn active_provider_config(&self) -> anyhow::Result<ProviderConfig> {
        self.providers
            .get(&self.active_provider)
            .cloned()
            .with_context(|| format!("no provider configured under key '{}'", self.active_provider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn loads_minimal_config_from_toml() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                active_provider = "primary"

                [providers.primary]
                type = "native_multimodal"
                api_key = "secret"

                [object_store]
                endpoint_url = "https://r2.example.com"
                access_key_id = "AKIA"
                secret_access_key = "shh"
                bucket = "pagecraft-art"
                "#,
            )?;

            let config = PagecraftConfig::load(&PathBuf::from("config.toml")).unwrap();
            assert_eq!(config.active_provider, "primary");
            assert_eq!(config.providers.len(), 1);
            assert_eq!(config.object_store.bucket, "pagecraft-art");
            Ok(())
        });
    }

    #[test]
    fn env_override_takes_precedence() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                active_provider = "primary"

                [providers.primary]
                type = "native_multimodal"
                api_key = "from-file"

                [object_store]
                endpoint_url = "https://r2.example.com"
                access_key_id = "AKIA"
                secret_access_key = "shh"
                bucket = "pagecraft-art"
                "#,
            )?;
            jail.set_env("PAGECRAFT_ACTIVE_PROVIDER", "primary");

            let config = PagecraftConfig::load(&PathBuf::from("config.toml")).unwrap();
            assert_eq!(config.active_provider, "primary");
            Ok(())
        });
    }

    #[test]
    fn active_provider_config_errors_on_unknown_key() {
        let config = PagecraftConfig {
            active_provider: "missing".to_string(),
            providers: HashMap::new(),
            object_store: StorageConfig {
                endpoint_url: String::new(),
                access_key_id: String::new(),
                secret_access_key: String::new(),
                bucket: String::new(),
                public_domain: None,
            },
            templates: TemplateConfig::default(),
        };
        assert!(config.active_provider_config().is_err());
    }
}
