//! INI-like inventory file parsing into per-host variable maps.
//!
//! Out of scope (per the distilled spec): groups, host ranges, `[group:children]` sections, and
//! vaulted values. This is a minimal reference parser sufficient to exercise the pipeline: one
//! `[host]` section per host, `key=value` lines. Its output type is the boundary contract
//! `plugin_registry::build_task_options` consumes; a fuller parser could replace it without
//! touching any other component.

use std::collections::BTreeMap;

use message_model::Value;

pub type HostVars = BTreeMap<String, Value>;
pub type Inventory = BTreeMap<String, HostVars>;

#[derive(Debug)]
pub enum InventoryError {
    Io(String),
    /// A `key=value` line (or a bare line) appeared before any `[host]` section header.
    KeyOutsideSection(usize),
    MalformedSectionHeader(usize),
    MalformedLine(usize),
}

impl std::fmt::Display for InventoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InventoryError::Io(msg) => write!(f, "reading inventory file: {msg}"),
            InventoryError::KeyOutsideSection(line) => {
                write!(f, "line {line}: key=value pair appears before any [host] section")
            }
            InventoryError::MalformedSectionHeader(line) => {
                write!(f, "line {line}: malformed section header")
            }
            InventoryError::MalformedLine(line) => write!(f, "line {line}: expected key=value"),
        }
    }
}

impl std::error::Error for InventoryError {}

pub fn parse_file(path: &std::path::Path) -> Result<Inventory, InventoryError> {
    let contents =
        std::fs::read_to_string(path).map_err(|err| InventoryError::Io(err.to_string()))?;
    parse_str(&contents)
}

/// Parses inventory text of the form:
///
/// ```text
/// [web1]
/// ansible_connection=local
/// ansible_user=deploy
///
/// [web2]
/// ansible_connection=local
/// ```
pub fn parse_str(contents: &str) -> Result<Inventory, InventoryError> {
    let mut inventory = Inventory::new();
    let mut current_host: Option<String> = None;

    for (idx, raw_line) in contents.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(stripped) = line.strip_prefix('[') {
            let name = stripped
                .strip_suffix(']')
                .ok_or(InventoryError::MalformedSectionHeader(line_no))?
                .trim();
            if name.is_empty() {
                return Err(InventoryError::MalformedSectionHeader(line_no));
            }
            inventory.entry(name.to_string()).or_default();
            current_host = Some(name.to_string());
            continue;
        }

        let host = current_host
            .as_ref()
            .ok_or(InventoryError::KeyOutsideSection(line_no))?;
        let (key, value) = line
            .split_once('=')
            .ok_or(InventoryError::MalformedLine(line_no))?;
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() {
            return Err(InventoryError::MalformedLine(line_no));
        }

        inventory
            .get_mut(host)
            .expect("host section was inserted above")
            .insert(key.to_string(), parse_value(value));
    }

    Ok(inventory)
}

/// Best-effort typing of a raw inventory value: integers and booleans are recognized so that,
/// e.g., `ansible_port=22` round-trips as `Value::Integer` rather than a string a connection
/// plugin would have to re-parse.
fn parse_value(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Integer(i);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_hosts_with_typed_values() {
        let text = "\
[web1]
ansible_connection=local
ansible_port=22
ansible_become=true

[web2]
ansible_connection=local
";
        let inventory = parse_str(text).unwrap();
        assert_eq!(inventory.len(), 2);
        assert_eq!(
            inventory["web1"]["ansible_connection"],
            Value::String("local".to_string())
        );
        assert_eq!(inventory["web1"]["ansible_port"], Value::Integer(22));
        assert_eq!(inventory["web1"]["ansible_become"], Value::Bool(true));
        assert_eq!(inventory["web2"].len(), 1);
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let text = "\
# a comment
[web1]
; also a comment

ansible_connection=local
";
        let inventory = parse_str(text).unwrap();
        assert_eq!(inventory["web1"].len(), 1);
    }

    #[test]
    fn key_before_any_section_is_an_error() {
        let err = parse_str("ansible_connection=local\n").unwrap_err();
        assert!(matches!(err, InventoryError::KeyOutsideSection(1)));
    }

    #[test]
    fn malformed_line_is_an_error() {
        let err = parse_str("[web1]\nno-equals-sign\n").unwrap_err();
        assert!(matches!(err, InventoryError::MalformedLine(2)));
    }

    #[test]
    fn empty_section_is_retained_with_no_vars() {
        let inventory = parse_str("[lonely]\n").unwrap();
        assert!(inventory["lonely"].is_empty());
    }
}
