//! Engine configuration
use super::chain::ChainLink;
use anyhow::Context;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Display name of the technical link accepted ideas end on.
    pub accept_link_name: String,
    /// Display name of the technical link rejected ideas end on.
    pub reject_link_name: String,
    /// bech32 prefix of external idea uids.
    pub idea_uid_prefix: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            accept_link_name: ChainLink::ACCEPT.to_string(),
            reject_link_name: ChainLink::REJECT.to_string(),
            idea_uid_prefix: "idea_".to_string(),
        }
    }
}

impl ExchangeConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(contents).context("invalid exchange config")?;
        config.validate()?;
        Ok(config)
    }
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&contents)
    }
    pub fn set_accept_link_name(mut self, name: &str) -> Self {
        self.accept_link_name = name.to_string();
        self
    }
    pub fn set_reject_link_name(mut self, name: &str) -> Self {
        self.reject_link_name = name.to_string();
        self
    }
    pub fn set_idea_uid_prefix(mut self, prefix: &str) -> Self {
        self.idea_uid_prefix = prefix.to_string();
        self
    }
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.accept_link_name.trim().is_empty() || self.reject_link_name.trim().is_empty() {
            anyhow::bail!("technical link names must not be empty");
        }
        if self.accept_link_name == self.reject_link_name {
            anyhow::bail!("accept and reject links need distinct names");
        }
        bech32::Hrp::parse(&self.idea_uid_prefix).with_context(|| {
            format!("idea_uid_prefix {:?} is not a bech32 hrp", self.idea_uid_prefix)
        })?;
        Ok(())
    }
    pub(crate) fn technical_links(&self) -> (ChainLink, ChainLink) {
        (
            ChainLink::initialize_technical(self.accept_link_name.as_str()),
            ChainLink::initialize_technical(self.reject_link_name.as_str()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config = ExchangeConfig::from_toml_str("accept_link_name = \"Approved\"").unwrap();

        assert_eq!(config.accept_link_name, "Approved");
        assert_eq!(config.reject_link_name, ChainLink::REJECT);
        assert_eq!(config.idea_uid_prefix, "idea_");
    }

    #[test]
    fn identical_link_names_are_refused() {
        let res = ExchangeConfig::from_toml_str(
            "accept_link_name = \"Done\"\nreject_link_name = \"Done\"",
        );

        assert!(res.is_err());
    }

    #[test]
    fn bad_prefix_is_refused() {
        assert!(ExchangeConfig::new().set_idea_uid_prefix("").validate().is_err());
    }
}
