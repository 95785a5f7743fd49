//! Stream identity and catalog description types.

use serde::{Deserialize, Serialize};

/// Opaque stream name (e.g. `"public.users"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamName(String);

impl StreamName {
    /// Create a new stream name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StreamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamName {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for StreamName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::borrow::Borrow<str> for StreamName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// How data is read from a source stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// One-time full read of all records.
    FullRefresh,
    /// Cursor-based incremental reads since last checkpoint.
    Incremental,
}

/// Identifies a stream in status, state, and error messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl StreamDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }
}

/// Catalog-level description of a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogStream {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub json_schema: serde_json::Value,
    pub supported_sync_modes: Vec<SyncMode>,
}

impl CatalogStream {
    /// Descriptor used to attribute messages to this stream.
    #[must_use]
    pub fn descriptor(&self) -> StreamDescriptor {
        StreamDescriptor {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_name_from_and_display() {
        let sn = StreamName::from("public.users");
        assert_eq!(sn.as_str(), "public.users");
        assert_eq!(sn.to_string(), "public.users");
    }

    #[test]
    fn stream_name_borrows_as_str_for_map_lookups() {
        let mut map = std::collections::HashMap::new();
        map.insert(StreamName::new("orders"), 3);
        assert_eq!(map.get("orders"), Some(&3));
    }

    #[test]
    fn catalog_stream_descriptor_keeps_namespace() {
        let stream = CatalogStream {
            name: "users".into(),
            namespace: Some("public".into()),
            json_schema: serde_json::json!({}),
            supported_sync_modes: vec![SyncMode::FullRefresh],
        };
        let descriptor = stream.descriptor();
        assert_eq!(descriptor.name, "users");
        assert_eq!(descriptor.namespace.as_deref(), Some("public"));
    }

    #[test]
    fn descriptor_skips_empty_namespace() {
        let json = serde_json::to_value(StreamDescriptor::new("users")).unwrap();
        assert!(json.get("namespace").is_none());
    }
}
