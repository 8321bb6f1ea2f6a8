//! Symbols: named configuration values with `${name}` expansion.
//!
//! A [`SymbolSource`] asks its providers in order and uses the first value found.
//! Values may themselves contain `${...}` references, which are expanded
//! recursively. Symbol names are case-insensitive.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{IocError, IocResult};

/// A source of raw (unexpanded) symbol values.
pub trait SymbolProvider: Send + Sync {
    /// Returns the value of `name`, or `None` if this provider does not define it.
    fn value_for_symbol(&self, name: &str) -> Option<String>;
}

/// Symbols from an in-memory map.
#[derive(Debug, Clone, Default)]
pub struct MapSymbolProvider {
    values: HashMap<String, String>,
}

impl MapSymbolProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) -> &mut Self {
        self.values.insert(name.as_ref().to_lowercase(), value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for MapSymbolProvider {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut provider = Self::new();
        for (name, value) in iter {
            provider.insert(name, value);
        }
        provider
    }
}

impl SymbolProvider for MapSymbolProvider {
    fn value_for_symbol(&self, name: &str) -> Option<String> {
        self.values.get(&name.to_lowercase()).cloned()
    }
}

/// Symbols from environment variables.
///
/// `server.port` is looked up as `SERVER_PORT`, or `APP_SERVER_PORT` with the
/// prefix `APP`.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentSymbolProvider {
    prefix: Option<String>,
}

impl EnvironmentSymbolProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    fn variable_name(&self, name: &str) -> String {
        let base: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        match &self.prefix {
            Some(prefix) => format!("{}_{base}", prefix.to_uppercase()),
            None => base,
        }
    }
}

impl SymbolProvider for EnvironmentSymbolProvider {
    fn value_for_symbol(&self, name: &str) -> Option<String> {
        std::env::var(self.variable_name(name)).ok()
    }
}

/// Symbols from a JSON document. Nested keys are joined with `.`, so
/// `{"db": {"url": "..."}}` defines `db.url`.
#[cfg(feature = "config")]
#[derive(Debug, Clone, Default)]
pub struct JsonSymbolProvider {
    values: MapSymbolProvider,
}

#[cfg(feature = "config")]
impl JsonSymbolProvider {
    pub fn from_json(json: &str) -> IocResult<Self> {
        let document: serde_json::Value = serde_json::from_str(json)
            .map_err(|err| IocError::Configuration(format!("invalid symbol document: {err}")))?;
        let mut values = MapSymbolProvider::new();
        flatten_json("", &document, &mut values);
        Ok(Self { values })
    }

    pub fn from_path(path: impl AsRef<std::path::Path>) -> IocResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|err| {
            IocError::Configuration(format!("cannot read symbol document {}: {err}", path.display()))
        })?;
        Self::from_json(&json)
    }
}

#[cfg(feature = "config")]
fn flatten_json(prefix: &str, value: &serde_json::Value, out: &mut MapSymbolProvider) {
    use serde_json::Value;

    let child = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        }
    };
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                flatten_json(&child(key.as_str()), nested, out);
            }
        }
        Value::Array(items) => {
            for (index, nested) in items.iter().enumerate() {
                flatten_json(&child(&index.to_string()), nested, out);
            }
        }
        Value::String(text) => {
            out.insert(prefix, text.clone());
        }
        Value::Null => {}
        other => {
            out.insert(prefix, other.to_string());
        }
    }
}

#[cfg(feature = "config")]
impl SymbolProvider for JsonSymbolProvider {
    fn value_for_symbol(&self, name: &str) -> Option<String> {
        self.values.value_for_symbol(name)
    }
}

/// Resolves and expands symbols against an ordered list of providers.
///
/// Fully expanded values are cached.
///
/// # Examples
///
/// ```
/// use ferrous_ioc::{MapSymbolProvider, SymbolSource};
/// use std::sync::Arc;
///
/// let defaults: MapSymbolProvider = [("host", "localhost"), ("url", "http://${host}:${port}")]
///     .into_iter()
///     .collect();
/// let overrides: MapSymbolProvider = [("port", "8080")].into_iter().collect();
///
/// let symbols = SymbolSource::new(vec![Arc::new(overrides), Arc::new(defaults)]);
/// assert_eq!(symbols.value_for_symbol("URL").unwrap(), "http://localhost:8080");
/// assert!(symbols.value_for_symbol("missing").is_err());
/// ```
pub struct SymbolSource {
    providers: Vec<Arc<dyn SymbolProvider>>,
    cache: RwLock<HashMap<String, String>>,
}

impl SymbolSource {
    pub fn new(providers: Vec<Arc<dyn SymbolProvider>>) -> Self {
        Self {
            providers,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the fully expanded value of `name`.
    pub fn value_for_symbol(&self, name: &str) -> IocResult<String> {
        self.resolve(name.trim(), &mut Vec::new())
    }

    /// Replaces every `${name}` in `input` with the symbol's expanded value.
    pub fn expand_symbols(&self, input: &str) -> IocResult<String> {
        self.expand(input, &mut Vec::new())
    }

    fn resolve(&self, name: &str, path: &mut Vec<String>) -> IocResult<String> {
        let key = name.to_lowercase();
        if let Some(value) = self.cache.read().get(&key) {
            return Ok(value.clone());
        }

        if path.iter().any(|entry| entry.eq_ignore_ascii_case(name)) {
            let mut path = path.clone();
            path.push(name.to_string());
            return Err(IocError::RecursiveSymbol {
                symbol: name.to_string(),
                path,
            });
        }

        let raw = self
            .providers
            .iter()
            .find_map(|provider| provider.value_for_symbol(name))
            .ok_or_else(|| IocError::UnknownSymbol {
                symbol: name.to_string(),
                path: path.clone(),
            })?;

        path.push(name.to_string());
        let expanded = self.expand(&raw, path);
        path.pop();
        let expanded = expanded?;

        self.cache.write().insert(key, expanded.clone());
        Ok(expanded)
    }

    fn expand(&self, input: &str, path: &mut Vec<String>) -> IocResult<String> {
        let mut output = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find("${") {
            output.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find('}').ok_or_else(|| {
                IocError::Configuration(format!(
                    "input string '{input}' is missing a symbol closing brace"
                ))
            })?;
            output.push_str(&self.resolve(after[..end].trim(), path)?);
            rest = &after[end + 1..];
        }
        output.push_str(rest);
        Ok(output)
    }
}

impl fmt::Debug for SymbolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolSource")
            .field("providers", &self.providers.len())
            .field("cached", &self.cache.read().len())
            .finish()
    }
}
