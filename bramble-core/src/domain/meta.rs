//! Object identity shared by all Bramble resources

use kube::Resource;
use std::fmt;

/// Identifies a namespaced object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of any namespaced cluster object
    pub fn of<K: Resource>(object: &K) -> Self {
        let meta = object.meta();
        Self::new(
            meta.namespace.clone().unwrap_or_default(),
            meta.name.clone().unwrap_or_default(),
        )
    }

    /// Parses a `namespace/name` string
    ///
    /// A bare `name` resolves to `default_namespace`.
    pub fn parse(input: &str, default_namespace: &str) -> Option<Self> {
        match input.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Some(Self::new(ns, name))
            }
            Some(_) => None,
            None if !input.is_empty() => Some(Self::new(default_namespace, input)),
            None => None,
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key() {
        assert_eq!(
            ObjectKey::parse("ci/build-42", "default"),
            Some(ObjectKey::new("ci", "build-42"))
        );
        assert_eq!(
            ObjectKey::parse("build-42", "default"),
            Some(ObjectKey::new("default", "build-42"))
        );
        assert_eq!(ObjectKey::parse("", "default"), None);
        assert_eq!(ObjectKey::parse("/x", "default"), None);
        assert_eq!(ObjectKey::parse("a/b/c", "default"), None);
    }

    #[test]
    fn test_key_of_object() {
        let mut job = k8s_openapi::api::batch::v1::Job::default();
        job.metadata.name = Some("run-1-cloner".to_string());
        job.metadata.namespace = Some("ci".to_string());
        assert_eq!(ObjectKey::of(&job), ObjectKey::new("ci", "run-1-cloner"));
    }

    #[test]
    fn test_key_display() {
        assert_eq!(ObjectKey::new("ci", "run").to_string(), "ci/run");
    }
}
