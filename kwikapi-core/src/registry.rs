//! Method registry keyed by version, namespace and method name.

use crate::error::CoreError;
use crate::method::{ApiFragment, MethodEntry, ParamSpec};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// An ordered path of namespace segments; `a/b` and `b/a` differ.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Namespace(Vec<String>);

impl Namespace {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Parses a `/`-separated path. Empty segments are ignored.
    pub fn parse(path: &str) -> Self {
        Self(
            path.split('/')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

type MethodTable = BTreeMap<String, Arc<MethodEntry>>;
type NamespaceTable = BTreeMap<Namespace, MethodTable>;

/// Registered methods.
///
/// Writes happen during startup; lookups take a shared lock and never
/// mutate.
#[derive(Default)]
pub struct MethodRegistry {
    versions: RwLock<BTreeMap<String, NamespaceTable>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every method exposed by `fragment`.
    ///
    /// All methods are validated before any is inserted, so a failed
    /// registration leaves the registry unchanged. Returns the number of
    /// methods added.
    pub fn register(
        &self,
        fragment: Arc<dyn ApiFragment>,
        version: &str,
        namespace: &str,
    ) -> Result<usize, CoreError> {
        let version = version.trim();
        if version.is_empty() || version.contains('/') {
            return Err(CoreError::InvalidMethod {
                method: fragment.fragment_name().to_string(),
                reason: format!("invalid version '{}'", version),
            });
        }
        let namespace = Namespace::parse(namespace);
        let fragment_name = fragment.fragment_name();

        let mut entries = Vec::new();
        for method in fragment.clone().methods() {
            let entry = method.build(fragment.clone(), version, &namespace)?;
            if entries.iter().any(|e: &MethodEntry| e.name == entry.name) {
                return Err(duplicate(version, &namespace, &entry.name));
            }
            entries.push(entry);
        }

        let mut versions = self.versions.write();
        if let Some(existing) = versions.get(version).and_then(|ns| ns.get(&namespace)) {
            if let Some(entry) = entries.iter().find(|e| existing.contains_key(&e.name)) {
                return Err(duplicate(version, &namespace, &entry.name));
            }
        }

        let count = entries.len();
        let table = versions
            .entry(version.to_string())
            .or_default()
            .entry(namespace.clone())
            .or_default();
        for entry in entries {
            table.insert(entry.name.clone(), Arc::new(entry));
        }

        tracing::info!(
            fragment = fragment_name,
            version,
            namespace = %namespace,
            methods = count,
            "Registered API fragment"
        );
        Ok(count)
    }

    /// Looks up a method by exact key.
    pub fn resolve(
        &self,
        version: &str,
        namespace: &Namespace,
        method: &str,
    ) -> Result<Arc<MethodEntry>, CoreError> {
        let versions = self.versions.read();
        let namespaces = versions
            .get(version)
            .ok_or_else(|| CoreError::UnknownVersion {
                version: version.to_string(),
            })?;
        let methods =
            namespaces
                .get(namespace)
                .ok_or_else(|| CoreError::UnknownVersionOrNamespace {
                    version: version.to_string(),
                    namespace: namespace.to_string(),
                })?;
        methods
            .get(method)
            .cloned()
            .ok_or_else(|| CoreError::UnknownApiFunction {
                method: method.to_string(),
            })
    }

    pub fn has_version(&self, version: &str) -> bool {
        self.versions.read().contains_key(version)
    }

    pub fn versions(&self) -> Vec<String> {
        self.versions.read().keys().cloned().collect()
    }

    /// Total number of registered methods.
    pub fn len(&self) -> usize {
        self.versions
            .read()
            .values()
            .flat_map(|ns| ns.values())
            .map(|m| m.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read-only projection for API documentation.
    ///
    /// `version` and `namespace` narrow the result. A filter naming
    /// nothing registered fails the same way [`resolve`](Self::resolve)
    /// would.
    pub fn describe(
        &self,
        version: Option<&str>,
        namespace: Option<&str>,
    ) -> Result<ApiDoc, CoreError> {
        let namespace = namespace.map(Namespace::parse);
        let versions = self.versions.read();

        if let Some(v) = version {
            if !versions.contains_key(v) {
                return Err(CoreError::UnknownVersion {
                    version: v.to_string(),
                });
            }
        }
        if let Some(ref ns) = namespace {
            let known = versions
                .iter()
                .filter(|(ver, _)| version.map_or(true, |v| v == ver.as_str()))
                .any(|(_, namespaces)| namespaces.contains_key(ns));
            if !known {
                return Err(CoreError::UnknownVersionOrNamespace {
                    version: version.unwrap_or_default().to_string(),
                    namespace: ns.to_string(),
                });
            }
        }

        let mut doc = ApiDoc::default();
        for (ver, namespaces) in versions.iter() {
            if version.is_some_and(|v| v != ver) {
                continue;
            }
            let mut version_doc = VersionDoc::default();
            for (ns, methods) in namespaces {
                if namespace.as_ref().is_some_and(|n| n != ns) {
                    continue;
                }
                let methods = methods
                    .values()
                    .map(|entry| MethodDoc::from(entry.as_ref()))
                    .collect();
                version_doc.namespaces.insert(ns.to_string(), methods);
            }
            if !version_doc.namespaces.is_empty() {
                doc.versions.insert(ver.clone(), version_doc);
            }
        }
        Ok(doc)
    }
}

fn duplicate(version: &str, namespace: &Namespace, method: &str) -> CoreError {
    CoreError::DuplicateApiFunction {
        version: version.to_string(),
        namespace: namespace.to_string(),
        method: method.to_string(),
    }
}

/// Documentation tree: version, then namespace, then method.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApiDoc {
    pub versions: BTreeMap<String, VersionDoc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VersionDoc {
    /// Keyed by namespace path; the root namespace is `""`.
    pub namespaces: BTreeMap<String, Vec<MethodDoc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MethodDoc {
    pub name: String,
    pub doc: Option<String>,
    pub params: Vec<ParamSpec>,
    pub returns: String,
    pub gives_stream: bool,
    pub fragment: &'static str,
}

impl From<&MethodEntry> for MethodDoc {
    fn from(entry: &MethodEntry) -> Self {
        Self {
            name: entry.name.clone(),
            doc: entry.doc.clone(),
            params: entry.params.clone(),
            returns: entry.return_type.to_string(),
            gives_stream: entry.is_streaming_response,
            fragment: entry.owner.fragment_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::Method;
    use crate::ErrorCode;
    use serde_json::json;

    struct Calc;

    impl ApiFragment for Calc {
        fn methods(self: Arc<Self>) -> Vec<Method> {
            vec![
                Method::from_signature("add(a: int, b: int) -> int")
                    .doc("Sum of a and b")
                    .handler(|_, args| Ok(args.i64("a")? + args.i64("b")?)),
                Method::from_signature("count(n: int = 3) -> stream[int]")
                    .stream_handler(|_, args| Ok((0..args.i64("n")?).map(Ok))),
            ]
        }
    }

    struct Strings;

    impl ApiFragment for Strings {
        fn methods(self: Arc<Self>) -> Vec<Method> {
            vec![Method::from_signature("add(a: str, b: str) -> str")
                .handler(|_, args| Ok(format!("{}{}", args.str("a")?, args.str("b")?)))]
        }
    }

    struct Broken;

    impl ApiFragment for Broken {
        fn methods(self: Arc<Self>) -> Vec<Method> {
            vec![
                Method::from_signature("ok() -> none").handler(|_, _| Ok(())),
                Method::from_signature("bad(a) -> int").handler(|_, _| Ok(1)),
            ]
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = MethodRegistry::new();
        assert_eq!(registry.register(Arc::new(Calc), "v1", "").unwrap(), 2);

        let entry = registry.resolve("v1", &Namespace::root(), "add").unwrap();
        assert_eq!(entry.name, "add");
        assert!(entry.namespace.is_root());
        assert!(registry.has_version("v1"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_rejected() {
        let registry = MethodRegistry::new();
        registry.register(Arc::new(Calc), "v1", "").unwrap();
        let err = registry.register(Arc::new(Strings), "v1", "").unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::DuplicateApiFunction);

        // Same names are fine in another version or namespace.
        registry.register(Arc::new(Strings), "v2", "").unwrap();
        registry.register(Arc::new(Strings), "v1", "Calc/ConcStr").unwrap();
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_failed_registration_is_atomic() {
        let registry = MethodRegistry::new();
        let err = registry.register(Arc::new(Broken), "v1", "").unwrap_err();
        assert!(matches!(err, CoreError::TypeNotSpecified { ref arg } if arg == "a"));
        assert!(registry.is_empty());
        assert!(!registry.has_version("v1"));
    }

    #[test]
    fn test_resolve_errors() {
        let registry = MethodRegistry::new();
        registry.register(Arc::new(Calc), "v1", "Calc").unwrap();

        let ns = Namespace::parse("Calc");
        let err = registry.resolve("v9", &ns, "add").unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::UnknownVersion);

        let err = registry
            .resolve("v1", &Namespace::parse("Other"), "add")
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::UnknownVersionOrNamespace);

        let err = registry.resolve("v1", &ns, "addd").unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::UnknownApiFunction);
    }

    #[test]
    fn test_namespace_order_matters() {
        let registry = MethodRegistry::new();
        registry.register(Arc::new(Strings), "v1", "a/b").unwrap();
        assert!(registry.resolve("v1", &Namespace::parse("a/b"), "add").is_ok());
        assert!(registry.resolve("v1", &Namespace::parse("b/a"), "add").is_err());
        assert_eq!(Namespace::parse("/a//b/").to_string(), "a/b");
    }

    #[test]
    fn test_empty_version_rejected() {
        let registry = MethodRegistry::new();
        assert!(registry.register(Arc::new(Calc), "", "").is_err());
        assert!(registry.register(Arc::new(Calc), "v1/x", "").is_err());
    }

    #[test]
    fn test_describe() {
        let registry = MethodRegistry::new();
        registry.register(Arc::new(Calc), "v1", "").unwrap();
        registry.register(Arc::new(Strings), "v2", "text").unwrap();

        let doc = registry.describe(None, None).unwrap();
        assert_eq!(doc.versions.len(), 2);

        let doc = registry.describe(Some("v1"), None).unwrap();
        let value = serde_json::to_value(&doc).unwrap();
        let methods = &value["versions"]["v1"]["namespaces"][""];
        assert_eq!(methods[0]["name"], "add");
        assert_eq!(methods[0]["doc"], "Sum of a and b");
        assert_eq!(methods[0]["params"][0]["type"], "int");
        assert_eq!(methods[0]["params"][0]["required"], true);
        assert_eq!(methods[1]["name"], "count");
        assert_eq!(methods[1]["gives_stream"], true);
        assert_eq!(methods[1]["params"][0]["default"], json!(3));
        assert_eq!(methods[1]["returns"], "stream[int]");

        let doc = registry.describe(Some("v2"), Some("text")).unwrap();
        assert_eq!(doc.versions["v2"].namespaces.len(), 1);
        let doc = registry.describe(None, Some("text")).unwrap();
        assert!(doc.versions.contains_key("v2"));
        assert!(!doc.versions.contains_key("v1"));
    }

    #[test]
    fn test_describe_unknown_filters() {
        let registry = MethodRegistry::new();
        registry.register(Arc::new(Calc), "v1", "").unwrap();
        registry.register(Arc::new(Strings), "v2", "text").unwrap();

        let err = registry.describe(Some("v9"), None).unwrap_err();
        assert!(matches!(err, CoreError::UnknownVersion { ref version } if version == "v9"));

        let err = registry.describe(Some("v2"), Some("nope")).unwrap_err();
        assert!(matches!(err, CoreError::UnknownVersionOrNamespace { .. }));

        let err = registry.describe(Some("v1"), Some("text")).unwrap_err();
        assert!(matches!(err, CoreError::UnknownVersionOrNamespace { .. }));

        let err = registry.describe(None, Some("nope")).unwrap_err();
        assert!(matches!(err, CoreError::UnknownVersionOrNamespace { .. }));
    }
}
