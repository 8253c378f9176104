use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use message_model::{CoreError, PluginKind, TaskOptions, Value};
use once_cell::sync::Lazy;

use crate::traits::{ActionPlugin, Become, Connection, ContentDescriptor};

/// An option a plugin declares, together with the preference-ordered list of host variable names
/// that can supply its value (`build_task_options` takes the first one present).
pub struct OptionSpec {
    pub name: &'static str,
    pub preferences: &'static [&'static str],
    pub required: bool,
}

/// A compile-time registration entry for one plugin. In the source this project is distilled
/// from, plugins register themselves by being enumerated as subclasses at import time; here the
/// registration is a plain struct literal, and the "macro" (`register_action!` etc.) is a thin
/// constructor so every plugin module reads the same way. See `DESIGN.md` for why this repo
/// doesn't reach for `linkme`/`inventory`-style distributed registration: with only two builtin
/// plugins the indirection isn't worth it, and the single `builtin_*()` assembly functions below
/// are the one place a real manifest-driven registry would plug in.
pub struct ActionDescriptor {
    pub short_name: &'static str,
    pub fq_name: &'static str,
    pub uses: &'static [PluginKind],
    pub options: &'static [OptionSpec],
    pub construct: fn() -> Arc<dyn ActionPlugin>,
}

pub struct ConnectionDescriptor {
    pub short_name: &'static str,
    pub fq_name: &'static str,
    pub uses: &'static [PluginKind],
    pub options: &'static [OptionSpec],
    pub construct: fn(&BTreeMap<String, Value>) -> Result<Arc<dyn Connection>, CoreError>,
}

pub struct BecomeDescriptor {
    pub short_name: &'static str,
    pub fq_name: &'static str,
    pub options: &'static [OptionSpec],
    pub construct: fn(&BTreeMap<String, Value>) -> Result<Arc<dyn Become>, CoreError>,
}

pub struct ContentDescriptorEntry {
    pub name: &'static str,
    pub construct: fn() -> Arc<dyn ContentDescriptor>,
}

pub static ACTION_REGISTRY: Lazy<Vec<ActionDescriptor>> =
    Lazy::new(|| crate::actions::builtin_actions());

pub static CONNECTION_REGISTRY: Lazy<Vec<ConnectionDescriptor>> =
    Lazy::new(|| crate::connections::builtin_connections());

pub static BECOME_REGISTRY: Lazy<Vec<BecomeDescriptor>> = Lazy::new(Vec::new);

pub static CONTENT_REGISTRY: Lazy<Vec<ContentDescriptorEntry>> =
    Lazy::new(|| crate::content::builtin_content_descriptors());

/// Produces a `TaskOptions` for `entrypoint_action` against `host_vars`, walking the `uses`
/// graph to a fixed point: seed with the entrypoint, then transitively resolve every plugin kind
/// it (or a plugin it pulled in) depends on, reading the kind's chosen plugin name from the
/// host's reserved variable (e.g. `ansible_connection`). `become` is optional; every other kind
/// missing from `host_vars` is a `ValidationError`.
pub fn build_task_options(
    host_vars: &BTreeMap<String, Value>,
    entrypoint_action: &str,
) -> Result<TaskOptions, CoreError> {
    let mut options = TaskOptions::new();
    let mut resolved_kinds: BTreeSet<PluginKind> = BTreeSet::new();
    let mut pending_uses: Vec<PluginKind> = Vec::new();

    let action = find_action(entrypoint_action)?;
    options
        .plugins
        .insert(PluginKind::Action, action.fq_name.to_string());
    resolve_options(&mut options, action.short_name, action.options, host_vars)?;
    resolved_kinds.insert(PluginKind::Action);
    pending_uses.extend(action.uses.iter().copied());

    while let Some(kind) = pending_uses.pop() {
        if resolved_kinds.contains(&kind) {
            continue;
        }
        resolved_kinds.insert(kind);

        let plugin_name = match host_vars.get(kind.host_variable_name()).and_then(Value::as_str) {
            Some(name) => name,
            None if kind.is_optional() => continue,
            None => {
                return Err(CoreError::ValidationError(format!(
                    "host variable {} is required to resolve a {:?} plugin but was not set",
                    kind.host_variable_name(),
                    kind
                )))
            }
        };

        match kind {
            PluginKind::Connection => {
                let descriptor = find_connection(plugin_name)?;
                options
                    .plugins
                    .insert(PluginKind::Connection, descriptor.fq_name.to_string());
                resolve_options(&mut options, descriptor.short_name, descriptor.options, host_vars)?;
                pending_uses.extend(descriptor.uses.iter().copied());
            }
            PluginKind::Become => {
                let descriptor = find_become(plugin_name)?;
                options
                    .plugins
                    .insert(PluginKind::Become, descriptor.fq_name.to_string());
                resolve_options(&mut options, descriptor.short_name, descriptor.options, host_vars)?;
            }
            PluginKind::Action | PluginKind::Exec | PluginKind::Module => {
                return Err(CoreError::ValidationError(format!(
                    "plugin kind {kind:?} cannot be resolved transitively via `uses`"
                )));
            }
        }
    }

    Ok(options)
}

fn resolve_options(
    options: &mut TaskOptions,
    plugin_name: &str,
    specs: &[OptionSpec],
    host_vars: &BTreeMap<String, Value>,
) -> Result<(), CoreError> {
    let mut resolved = BTreeMap::new();
    for spec in specs {
        let value = spec
            .preferences
            .iter()
            .find_map(|var_name| host_vars.get(*var_name).cloned());
        match value {
            Some(value) => {
                resolved.insert(spec.name.to_string(), value);
            }
            None if spec.required => {
                return Err(CoreError::ValidationError(format!(
                    "plugin {plugin_name} requires option {} but none of {:?} were set",
                    spec.name, spec.preferences
                )))
            }
            None => {}
        }
    }
    options.plugin_options.insert(plugin_name.to_string(), resolved);
    Ok(())
}

fn find_action(short_name: &str) -> Result<&'static ActionDescriptor, CoreError> {
    let mut matches = ACTION_REGISTRY.iter().filter(|d| d.short_name == short_name);
    let found = matches
        .next()
        .ok_or_else(|| CoreError::ValidationError(format!("no action plugin named {short_name}")))?;
    if matches.next().is_some() {
        return Err(CoreError::ValidationError(format!(
            "ambiguous action plugin name {short_name}: multiple registrations matched"
        )));
    }
    Ok(found)
}

fn find_connection(short_name: &str) -> Result<&'static ConnectionDescriptor, CoreError> {
    let mut matches = CONNECTION_REGISTRY
        .iter()
        .filter(|d| d.short_name == short_name);
    let found = matches.next().ok_or_else(|| {
        CoreError::ValidationError(format!("no connection plugin named {short_name}"))
    })?;
    if matches.next().is_some() {
        return Err(CoreError::ValidationError(format!(
            "ambiguous connection plugin name {short_name}: multiple registrations matched"
        )));
    }
    Ok(found)
}

fn find_become(short_name: &str) -> Result<&'static BecomeDescriptor, CoreError> {
    let mut matches = BECOME_REGISTRY.iter().filter(|d| d.short_name == short_name);
    let found = matches
        .next()
        .ok_or_else(|| CoreError::ValidationError(format!("no become plugin named {short_name}")))?;
    if matches.next().is_some() {
        return Err(CoreError::ValidationError(format!(
            "ambiguous become plugin name {short_name}: multiple registrations matched"
        )));
    }
    Ok(found)
}

/// Instantiates the action named by `task_options.plugins[action]` and returns it ready to run.
/// Ambiguity or absence is a `ValidationError`, per `find_action`.
pub fn get_action(task_options: &TaskOptions) -> Result<Arc<dyn ActionPlugin>, CoreError> {
    let fq_name = task_options
        .plugins
        .get(&PluginKind::Action)
        .ok_or_else(|| CoreError::ValidationError("task options have no action plugin".to_string()))?;
    let descriptor = ACTION_REGISTRY
        .iter()
        .find(|d| d.fq_name == fq_name)
        .ok_or_else(|| CoreError::ValidationError(format!("no action plugin registered as {fq_name}")))?;
    Ok((descriptor.construct)())
}

/// Instantiates and configures the connection named by `task_options.plugins[connection]`.
pub fn get_connection(task_options: &TaskOptions) -> Result<Arc<dyn Connection>, CoreError> {
    let fq_name = task_options.plugins.get(&PluginKind::Connection).ok_or_else(|| {
        CoreError::ValidationError("task options have no connection plugin".to_string())
    })?;
    let descriptor = CONNECTION_REGISTRY
        .iter()
        .find(|d| d.fq_name == fq_name)
        .ok_or_else(|| {
            CoreError::ValidationError(format!("no connection plugin registered as {fq_name}"))
        })?;
    let empty = BTreeMap::new();
    let plugin_options = task_options
        .plugin_options
        .get(descriptor.short_name)
        .unwrap_or(&empty);
    (descriptor.construct)(plugin_options)
}

/// Instantiates and configures the become plugin named by `task_options.plugins[become]`, if any.
pub fn get_become(task_options: &TaskOptions) -> Result<Option<Arc<dyn Become>>, CoreError> {
    let Some(fq_name) = task_options.plugins.get(&PluginKind::Become) else {
        return Ok(None);
    };
    let descriptor = BECOME_REGISTRY
        .iter()
        .find(|d| d.fq_name == fq_name)
        .ok_or_else(|| {
            CoreError::ValidationError(format!("no become plugin registered as {fq_name}"))
        })?;
    let empty = BTreeMap::new();
    let plugin_options = task_options
        .plugin_options
        .get(descriptor.short_name)
        .unwrap_or(&empty);
    Ok(Some((descriptor.construct)(plugin_options)?))
}

/// Looks up a content descriptor by name and runs it against `key`. Called by the worker's
/// dispatch loop when it receives a `ContentDescriptorRequest`.
pub async fn run_content_descriptor(
    plugin: &str,
    key: &str,
    blob_store: &blob_store::BlobStore,
) -> Result<(), String> {
    let entry = CONTENT_REGISTRY
        .iter()
        .find(|d| d.name == plugin)
        .ok_or_else(|| format!("no content descriptor registered as {plugin}"))?;
    (entry.construct)().generate(key, blob_store).await
}
