//! Configuration layering
// (c) 2025 Ross Younger

use anyhow::{Context as _, Result};
use figment::{Figment, Provider, providers::Serialized};
use serde::{Deserialize, Serialize};

use super::Configuration;

/// Merges the configuration sources.
///
/// The only sources are the hard-wired system defaults and whatever was
/// given on the command line. Later merges take priority.
#[derive(Debug, Default)]
pub struct Manager {
    data: Figment,
}

impl Manager {
    /// Creates a manager holding only the system defaults
    #[must_use]
    pub fn standard() -> Self {
        let mut new1 = Self::without_default();
        new1.apply_system_default();
        new1
    }

    /// Creates an empty manager
    #[must_use]
    pub fn without_default() -> Self {
        Self::default()
    }

    /// Merges in a data set, which is some sort of [figment::Provider](https://docs.rs/figment/latest/figment/trait.Provider.html).
    /// This uses figment's `merge` operation, which prefers to _replace_ existing items.
    pub fn merge_provider<T>(&mut self, provider: T)
    where
        T: Provider,
    {
        let f = std::mem::take(&mut self.data);
        self.data = f.merge(provider);
    }

    /// Merges in a serializable set of overrides.
    ///
    /// Members that serialize to nothing (typically `None`s marked
    /// `skip_serializing_if`) leave the existing values in place.
    pub fn merge_overrides<T: Serialize>(&mut self, overrides: &T) {
        self.merge_provider(Serialized::defaults(overrides));
    }

    /// Applies the system default settings, at a lower priority than everything else
    pub fn apply_system_default(&mut self) {
        let f = std::mem::take(&mut self.data);
        self.data = f.join(Serialized::defaults(Configuration::system_default()));
    }

    /// Attempts to extract a particular struct from the data.
    pub fn get<'de, T>(&self) -> Result<T, figment::Error>
    where
        T: Deserialize<'de>,
    {
        self.data.extract::<T>()
    }

    /// Extracts and validates the final [`Configuration`].
    pub fn configuration(&self) -> Result<Configuration> {
        self.get::<Configuration>()
            .context("invalid configuration")?
            .validate()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use pretty_assertions::assert_eq;

    use super::Manager;
    use crate::config::{ClientOverrides, CommonOverrides, Configuration, ServerOverrides};
    use crate::util::TimeFormat;

    #[test]
    fn defaults() {
        let mgr = Manager::standard();
        let result: Configuration = mgr.get().unwrap();
        assert_eq!(&result, Configuration::system_default());
    }

    #[test]
    fn empty_overrides_change_nothing() {
        let mut mgr = Manager::standard();
        mgr.merge_overrides(&CommonOverrides::default());
        mgr.merge_overrides(&ServerOverrides::default());
        mgr.merge_overrides(&ClientOverrides::default());
        assert_eq!(&mgr.configuration().unwrap(), Configuration::system_default());
    }

    #[test]
    fn cli_beats_default() {
        let mut mgr = Manager::standard();
        mgr.merge_overrides(&CommonOverrides {
            timeout: Some(1),
            time_format: Some(TimeFormat::Utc),
            ..Default::default()
        });
        mgr.merge_overrides(&ServerOverrides {
            max_connections: Some(3),
            ..Default::default()
        });
        let expected = Configuration {
            timeout: 1,
            time_format: TimeFormat::Utc,
            max_connections: 3,
            ..Configuration::system_default().clone()
        };
        assert_eq!(mgr.configuration().unwrap(), expected);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut mgr = Manager::standard();
        mgr.merge_overrides(&CommonOverrides {
            attempts: Some(0),
            ..Default::default()
        });
        assert!(mgr.configuration().is_err());
    }

    #[test]
    fn missing_defaults_fail_extraction() {
        let mgr = Manager::without_default();
        assert!(mgr.get::<Configuration>().is_err());
    }
}
