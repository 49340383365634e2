//! Plugin trait and builder factory.

use std::collections::HashMap;

use crate::session::Session;

/// Free-form arguments from the configuration document.
pub type PluginArgs = HashMap<String, String>;

/// Constructs a plugin instance for one session.
pub type PluginBuilder = fn(&PluginArgs) -> Box<dyn Plugin>;

/// A scheduling policy plugin.
///
/// A fresh instance is built per session. On open it registers policy
/// functions against its name; on close it may publish status through the
/// session's cache handle.
pub trait Plugin {
    fn name(&self) -> &'static str;

    fn on_session_open(&mut self, ssn: &mut Session);

    fn on_session_close(&mut self, _ssn: &mut Session) {}
}

/// Registry of plugin builders keyed by well-known name.
///
/// The plugins crate assembles the default factory at startup; sessions
/// resolve configured plugin names through it.
#[derive(Default)]
pub struct PluginFactory {
    builders: HashMap<String, PluginBuilder>,
}

impl PluginFactory {
    pub fn new() -> PluginFactory {
        PluginFactory::default()
    }

    /// Register a builder under a name. Re-registering replaces.
    pub fn register(&mut self, name: &str, builder: PluginBuilder) {
        self.builders.insert(name.to_string(), builder);
    }

    pub fn get(&self, name: &str) -> Option<PluginBuilder> {
        self.builders.get(name).copied()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.builders.keys().cloned().collect();
        names.sort();
        names
    }
}
