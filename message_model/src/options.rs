use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// The kind of plugin a `TaskOptions.plugins` entry names.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum PluginKind {
    Action,
    Connection,
    Become,
    Exec,
    Module,
}

impl PluginKind {
    /// The reserved inventory variable name a host uses to select this kind's plugin
    /// (e.g. `ansible_connection`), matching the original source's `ansible_variable_name`.
    pub fn host_variable_name(&self) -> &'static str {
        match self {
            PluginKind::Action => "ansible_action",
            PluginKind::Connection => "ansible_connection",
            PluginKind::Become => "ansible_become_method",
            PluginKind::Exec => "ansible_exec",
            PluginKind::Module => "ansible_module",
        }
    }

    /// Whether a task can be dispatched without this kind being resolved (only `become` is
    /// optional: most hosts don't escalate privilege).
    pub fn is_optional(&self) -> bool {
        matches!(self, PluginKind::Become)
    }
}

/// Immutable configuration attached to a task.
///
/// `#[derive(Clone)]` already performs a deep copy here: `BTreeMap` and `Value` both own their
/// contents, so cloning a `TaskOptions` can never alias the original's `plugin_options`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOptions {
    pub plugins: BTreeMap<PluginKind, String>,
    pub plugin_options: BTreeMap<String, BTreeMap<String, Value>>,
}

impl TaskOptions {
    pub fn new() -> TaskOptions {
        TaskOptions::default()
    }

    pub fn connection_plugin(&self) -> Option<&str> {
        self.plugins.get(&PluginKind::Connection).map(|s| s.as_str())
    }

    pub fn become_plugin(&self) -> Option<&str> {
        self.plugins.get(&PluginKind::Become).map(|s| s.as_str())
    }

    pub fn options_for(&self, plugin_name: &str) -> Option<&BTreeMap<String, Value>> {
        self.plugin_options.get(plugin_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_deep_copies_plugin_options() {
        let mut options = TaskOptions::new();
        options
            .plugin_options
            .entry("local".to_string())
            .or_default()
            .insert("user".to_string(), Value::from("alice"));

        let mut cloned = options.clone();
        cloned
            .plugin_options
            .get_mut("local")
            .unwrap()
            .insert("user".to_string(), Value::from("bob"));

        assert_eq!(
            options.plugin_options["local"]["user"],
            Value::from("alice")
        );
        assert_eq!(cloned.plugin_options["local"]["user"], Value::from("bob"));
    }
}
