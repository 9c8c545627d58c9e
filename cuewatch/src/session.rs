//! Per-user session persistence.
//!
//! A flat key/value store serialized as JSON, keyed `"<Window>/<Key>"`.
//! Widgets register `(key, getter, setter)` triples against their window;
//! saving walks the getters, restoring feeds stored values back through
//! the setters. Plugin state travels as `"PluginName::<json>"` strings and
//! is accepted as JSON only; the legacy pickled payloads of the old
//! console are rejected outright.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

pub struct SessionStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, Value>>,
}

impl SessionStore {
    /// Open a store; a missing file is an empty session, not an error.
    pub fn load(path: &Path) -> SessionStore {
        let values = std::fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();
        SessionStore {
            path: path.to_path_buf(),
            values: Mutex::new(values),
        }
    }

    pub fn save(&self) -> io::Result<()> {
        let values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        let text = serde_json::to_string_pretty(&*values)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, text)
    }

    fn full_key(window: &str, key: &str) -> String {
        format!("{}/{}", window, key)
    }

    pub fn set<T: Serialize>(&self, window: &str, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(value) => {
                self.values
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .insert(Self::full_key(window, key), value);
            }
            Err(err) => warn!(window, key, %err, "unserializable session value"),
        }
    }

    pub fn get<T: DeserializeOwned>(&self, window: &str, key: &str) -> Option<T> {
        let values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        let value = values.get(&Self::full_key(window, key))?.clone();
        drop(values);
        serde_json::from_value(value).ok()
    }

    pub fn remove(&self, window: &str, key: &str) {
        self.values
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&Self::full_key(window, key));
    }
}

type Getter = Box<dyn Fn() -> Value + Send>;
type Setter = Box<dyn Fn(Value) + Send>;

/// The `(key, getter, setter)` triples one window's widgets declare.
pub struct WindowSession {
    window: String,
    entries: Vec<(String, Getter, Setter)>,
}

impl WindowSession {
    pub fn new(window: &str) -> WindowSession {
        WindowSession {
            window: window.to_string(),
            entries: Vec::new(),
        }
    }

    pub fn register(
        &mut self,
        key: &str,
        getter: impl Fn() -> Value + Send + 'static,
        setter: impl Fn(Value) + Send + 'static,
    ) {
        self.entries
            .push((key.to_string(), Box::new(getter), Box::new(setter)));
    }

    /// Walk the getters into the store.
    pub fn save_into(&self, store: &SessionStore) {
        for (key, getter, _) in &self.entries {
            store.set(&self.window, key, &getter());
        }
    }

    /// Feed each stored value through its widget's setter.
    pub fn restore_from(&self, store: &SessionStore) {
        for (key, _, setter) in &self.entries {
            if let Some(value) = store.get::<Value>(&self.window, key) {
                setter(value);
            }
        }
    }
}

/// Encode one opened plugin as `"Name::<json-state>"`.
pub fn encode_plugin_state(name: &str, state: &Value) -> String {
    format!("{}::{}", name, state)
}

/// Decode a `"Name::<json-state>"` entry. Only JSON payloads are valid;
/// anything else (notably legacy pickled blobs) is a validation error.
pub fn decode_plugin_state(entry: &str) -> Result<(String, Value), String> {
    let (name, payload) = entry
        .split_once("::")
        .ok_or_else(|| format!("malformed plugin state entry: {}", entry))?;
    let state = serde_json::from_str(payload)
        .map_err(|_| format!("plugin {} carries a non-JSON state payload", name))?;
    Ok((name.to_string(), state))
}
