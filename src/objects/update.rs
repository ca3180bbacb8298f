//! Update - the root document of an update descriptor.
//!
//! Holds the main release, the optional setup release, plugin entries
//! (redirects and hosts) and the changelog.

use crate::objects::release::{ChangelogEntry, Plugin, PluginKind, Release};

/// The root update document.
///
/// Update is the top-level container that holds:
/// - The setup (installer) release, if published
/// - The main application release
/// - Redirect and host plugin entries
/// - Changelog entries, newest first by convention
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Update {
    /// Installer release
    pub setup_release: Option<Release>,
    /// Main application release (required by the schema)
    pub main_release: Option<Release>,
    /// Redirect plugins
    pub redirects: Vec<Plugin>,
    /// Host plugins
    pub hosts: Vec<Plugin>,
    /// Changelog
    pub changelog: Vec<ChangelogEntry>,
}

impl Update {
    /// Creates an empty update document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an update document with a main release.
    pub fn with_main_release(release: Release) -> Self {
        Self {
            main_release: Some(release),
            ..Default::default()
        }
    }

    /// Returns the plugin list for the given kind.
    pub fn plugins(&self, kind: PluginKind) -> &[Plugin] {
        match kind {
            PluginKind::Redirect => &self.redirects,
            PluginKind::Host => &self.hosts,
        }
    }

    /// Returns the mutable plugin list for the given kind.
    pub fn plugins_mut(&mut self, kind: PluginKind) -> &mut Vec<Plugin> {
        match kind {
            PluginKind::Redirect => &mut self.redirects,
            PluginKind::Host => &mut self.hosts,
        }
    }

    /// Appends a plugin of the given kind.
    pub fn add_plugin(&mut self, kind: PluginKind, plugin: Plugin) {
        self.plugins_mut(kind).push(plugin);
    }

    /// Appends a changelog entry.
    pub fn add_changelog_entry(&mut self, entry: ChangelogEntry) {
        self.changelog.push(entry);
    }

    /// Finds a redirect plugin by name.
    pub fn find_redirect(&self, name: &str) -> Option<&Plugin> {
        self.find_plugin(PluginKind::Redirect, name)
    }

    /// Finds a host plugin by name.
    pub fn find_host(&self, name: &str) -> Option<&Plugin> {
        self.find_plugin(PluginKind::Host, name)
    }

    fn find_plugin(&self, kind: PluginKind, name: &str) -> Option<&Plugin> {
        self.plugins(kind)
            .iter()
            .find(|p| p.name.as_deref() == Some(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_empty() {
        let update = Update::new();
        assert!(update.main_release.is_none());
        assert!(update.setup_release.is_none());
        assert!(update.redirects.is_empty());
        assert!(update.hosts.is_empty());
        assert!(update.changelog.is_empty());
    }

    #[test]
    fn test_find_plugins() {
        let mut update = Update::with_main_release(Release::new("App", "1.0"));
        update.add_plugin(
            PluginKind::Host,
            Plugin::new("HostA", "2", "HostA.jar"),
        );
        update.add_plugin(
            PluginKind::Redirect,
            Plugin::new("RedirectB", "3", "RedirectB.xml"),
        );

        assert_eq!(update.plugins(PluginKind::Host).len(), 1);
        assert_eq!(
            update.find_host("HostA").and_then(|p| p.version.as_deref()),
            Some("2")
        );
        assert!(update.find_host("RedirectB").is_none());
        assert_eq!(
            update
                .find_redirect("RedirectB")
                .and_then(|p| p.filename.as_deref()),
            Some("RedirectB.xml")
        );
    }
}
