//! Capability descriptors and the per-agent registry.
//!
//! Capabilities are metadata for routers and discovery tooling. The only
//! runtime use inside the hub is the optional parameter check at admission.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{HubError, Result};

/// Declared type of a capability parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    #[default]
    Any,
}

impl ParamKind {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[serde(default)]
    pub kind: ParamKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

impl ParameterSpec {
    pub fn required(kind: ParamKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            required: true,
            description: description.into(),
        }
    }

    pub fn optional(kind: ParamKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            required: false,
            description: description.into(),
        }
    }
}

/// Descriptor of one named operation an agent can perform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,
    pub category: String,
    /// Natural-language routing hints.
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub alias_params: HashMap<String, HashMap<String, Value>>,
    pub registered_at: DateTime<Utc>,
}

impl Capability {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: BTreeMap::new(),
            category: "general".to_string(),
            aliases: Vec::new(),
            alias_params: HashMap::new(),
            registered_at: Utc::now(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.parameters.insert(name.into(), spec);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_aliases(mut self, aliases: Vec<String>) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn with_alias_params(mut self, alias: impl Into<String>, params: HashMap<String, Value>) -> Self {
        self.alias_params.insert(alias.into(), params);
        self
    }

    /// Check task parameters against the declared schema.
    ///
    /// Undeclared keys pass through; only declared ones are checked.
    pub fn validate_params(&self, params: &HashMap<String, Value>) -> Result<()> {
        for (name, spec) in &self.parameters {
            let reason = match params.get(name) {
                None | Some(Value::Null) if spec.required => {
                    format!("missing required parameter '{}'", name)
                }
                Some(value) if !value.is_null() && !spec.kind.matches(value) => format!(
                    "parameter '{}' expected {:?}, got {}",
                    name,
                    spec.kind,
                    json_type_name(value)
                ),
                _ => continue,
            };
            return Err(HubError::InvalidParams {
                capability: self.name.clone(),
                reason,
            });
        }
        Ok(())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// File extensions an agent can open or edit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFormats {
    pub open: Vec<String>,
    pub edit: Vec<String>,
}

impl FileFormats {
    fn add(list: &mut Vec<String>, formats: &[&str]) {
        for fmt in formats {
            let fmt = normalize_extension(fmt);
            if !list.contains(&fmt) {
                list.push(fmt);
            }
        }
    }
}

fn normalize_extension(ext: &str) -> String {
    let lower = ext.trim().to_lowercase();
    if lower.starts_with('.') {
        lower
    } else {
        format!(".{}", lower)
    }
}

fn extension_of(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(normalize_extension)
}

#[derive(Debug, Default)]
struct RegistryInner {
    // Registration order is preserved for listing.
    order: Vec<String>,
    details: HashMap<String, Capability>,
    formats: FileFormats,
}

/// Per-agent table of capabilities.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    inner: RwLock<RegistryInner>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability. A duplicate name is ignored, never overwritten.
    pub fn register(&self, capability: Capability) -> bool {
        let mut inner = self.inner.write();
        if inner.details.contains_key(&capability.name) {
            debug!(capability = %capability.name, "Capability already registered, ignoring");
            return false;
        }
        inner.order.push(capability.name.clone());
        inner.details.insert(capability.name.clone(), capability);
        true
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut inner = self.inner.write();
        if inner.details.remove(name).is_some() {
            inner.order.retain(|n| n != name);
            true
        } else {
            debug!(capability = %name, "Capability not found, nothing to remove");
            false
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().details.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Capability> {
        self.inner.read().details.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.read().order.clone()
    }

    pub fn details(&self) -> HashMap<String, Capability> {
        self.inner.read().details.clone()
    }

    pub fn by_category(&self, category: &str) -> Vec<String> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter(|n| inner.details.get(*n).is_some_and(|c| c.category == category))
            .cloned()
            .collect()
    }

    pub fn categories(&self) -> Vec<String> {
        let inner = self.inner.read();
        let mut categories: Vec<String> = Vec::new();
        for name in &inner.order {
            if let Some(cap) = inner.details.get(name)
                && !categories.contains(&cap.category)
            {
                categories.push(cap.category.clone());
            }
        }
        categories
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn register_file_formats(&self, open: &[&str], edit: &[&str]) {
        let mut inner = self.inner.write();
        FileFormats::add(&mut inner.formats.open, open);
        FileFormats::add(&mut inner.formats.edit, edit);
    }

    pub fn file_formats(&self) -> FileFormats {
        self.inner.read().formats.clone()
    }

    pub fn can_open_file(&self, path: &str) -> bool {
        extension_of(path).is_some_and(|ext| self.inner.read().formats.open.contains(&ext))
    }

    pub fn can_edit_file(&self, path: &str) -> bool {
        extension_of(path).is_some_and(|ext| self.inner.read().formats.edit.contains(&ext))
    }
}
