//! Method declarations, bound arguments and the callable error type.

use crate::context::RequestContext;
use crate::error::CoreError;
use crate::registry::Namespace;
use crate::signature::Signature;
use crate::types::TypeDescriptor;
use kwikapi_protocol::{ErrorCode, ProtocolError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// A lazily produced sequence of values.
pub type ValueStream = Box<dyn Iterator<Item = Result<Value, CallError>> + Send>;

pub type UnaryFn = dyn Fn(&mut RequestContext, Args) -> Result<Value, CallError> + Send + Sync;
pub type StreamFn = dyn Fn(&mut RequestContext, Args) -> Result<ValueStream, CallError> + Send + Sync;

/// Failure reported by a registered callable.
///
/// Any error type converts into it with `?`. Errors from the taxonomy keep
/// their canonical code; every other error reports code 50000 with its
/// message. Application codes are set with [`CallError::new`] and reach the
/// caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallError {
    pub message: String,
    pub code: Option<i64>,
    /// Kind name reported in the envelope `error` field.
    pub kind: Option<String>,
}

impl CallError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
            kind: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            kind: None,
        }
    }

    pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code.code(), message).with_kind(code.name())
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Code reported in the envelope.
    pub fn code(&self) -> i64 {
        self.code.unwrap_or_else(|| ErrorCode::Internal.code())
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)
    }
}

impl<E> From<E> for CallError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        let dynamic: &(dyn std::error::Error + 'static) = &err;
        if let Some(core) = dynamic.downcast_ref::<CoreError>() {
            return CallError::from_code(core.error_code(), core.to_string());
        }
        if let Some(proto) = dynamic.downcast_ref::<ProtocolError>() {
            return CallError::from_code(proto.error_code(), proto.to_string());
        }

        let type_name = std::any::type_name::<E>();
        let short = type_name
            .split('<')
            .next()
            .and_then(|path| path.rsplit("::").next())
            .unwrap_or(type_name);
        CallError::internal(err.to_string()).with_kind(short)
    }
}

/// One bound argument.
pub enum Arg {
    Value(Value),
    Stream(ValueStream),
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Arg::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Arguments after coercion, keyed by parameter name.
#[derive(Debug, Default)]
pub struct Args {
    values: HashMap<String, Arg>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, arg: Arg) {
        self.values.insert(name.into(), arg);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.values.get(name) {
            Some(Arg::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// Deserializes an argument into `T`.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T, CallError> {
        let value = self.value(name).ok_or_else(|| {
            CallError::from_code(
                ErrorCode::KeywordArgumentError,
                format!("missing argument \"{}\"", name),
            )
        })?;
        T::deserialize(value).map_err(|e| {
            CallError::from_code(
                ErrorCode::UnsupportedType,
                format!("argument \"{}\": {}", name, e),
            )
        })
    }

    pub fn i64(&self, name: &str) -> Result<i64, CallError> {
        self.get(name)
    }

    pub fn f64(&self, name: &str) -> Result<f64, CallError> {
        self.get(name)
    }

    pub fn bool(&self, name: &str) -> Result<bool, CallError> {
        self.get(name)
    }

    pub fn str(&self, name: &str) -> Result<&str, CallError> {
        self.value(name).and_then(Value::as_str).ok_or_else(|| {
            CallError::from_code(
                ErrorCode::UnsupportedType,
                format!("argument \"{}\" is not a string", name),
            )
        })
    }

    /// Takes ownership of a streamed argument.
    pub fn take_stream(&mut self, name: &str) -> Result<ValueStream, CallError> {
        match self.values.remove(name) {
            Some(Arg::Stream(s)) => Ok(s),
            Some(Arg::Value(Value::Array(items))) => Ok(Box::new(items.into_iter().map(Ok))),
            Some(other) => {
                self.values.insert(name.to_string(), other);
                Err(CallError::from_code(
                    ErrorCode::UnsupportedType,
                    format!("argument \"{}\" is not a stream", name),
                ))
            }
            None => Err(CallError::from_code(
                ErrorCode::KeywordArgumentError,
                format!("missing argument \"{}\"", name),
            )),
        }
    }
}

/// A registered callable.
#[derive(Clone)]
pub enum Handler {
    Unary(Arc<UnaryFn>),
    Stream(Arc<StreamFn>),
}

/// What a callable produced.
pub enum Output {
    Value(Value),
    Stream(ValueStream),
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Output::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Accepts either a [`TypeDescriptor`] or a type expression.
pub trait IntoTypeDescriptor {
    fn into_type(self) -> Result<TypeDescriptor, CoreError>;
}

impl IntoTypeDescriptor for TypeDescriptor {
    fn into_type(self) -> Result<TypeDescriptor, CoreError> {
        Ok(self)
    }
}

impl IntoTypeDescriptor for &str {
    fn into_type(self) -> Result<TypeDescriptor, CoreError> {
        TypeDescriptor::parse(self)
    }
}

/// Declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type", serialize_with = "serialize_display")]
    pub ty: TypeDescriptor,
    pub required: bool,
    pub default: Option<Value>,
}

fn serialize_display<S: serde::Serializer>(
    ty: &TypeDescriptor,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(ty)
}

#[derive(Debug, Clone)]
struct DeclaredParam {
    name: String,
    ty: Option<TypeDescriptor>,
    default: Option<Value>,
}

/// Builder for one exposed method.
///
/// Declaration errors are kept until registration, which fails with them.
///
/// ```ignore
/// Method::from_signature("add(a: int, b: int) -> int")
///     .doc("Adds two numbers")
///     .handler(|_ctx, args| Ok(args.i64("a")? + args.i64("b")?))
/// ```
pub struct Method {
    name: String,
    params: Vec<DeclaredParam>,
    returns: Option<TypeDescriptor>,
    doc: Option<String>,
    handler: Option<Handler>,
    error: Option<CoreError>,
}

impl Method {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns: None,
            doc: None,
            handler: None,
            error: None,
        }
    }

    /// Declares name, parameters and return type from a signature string.
    pub fn from_signature(signature: &str) -> Self {
        match Signature::parse(signature) {
            Ok(sig) => Self {
                name: sig.name,
                params: sig
                    .params
                    .into_iter()
                    .map(|p| DeclaredParam {
                        name: p.name,
                        ty: p.ty,
                        default: p.default,
                    })
                    .collect(),
                returns: sig.returns,
                doc: None,
                handler: None,
                error: None,
            },
            Err(e) => {
                let name = signature.split('(').next().unwrap_or_default().trim();
                let mut method = Self::new(name);
                method.error = Some(e);
                method
            }
        }
    }

    fn record<T>(&mut self, result: Result<T, CoreError>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.error.get_or_insert(e);
                None
            }
        }
    }

    /// Adds a required parameter.
    pub fn param(mut self, name: impl Into<String>, ty: impl IntoTypeDescriptor) -> Self {
        let ty = self.record(ty.into_type());
        self.params.push(DeclaredParam {
            name: name.into(),
            ty,
            default: None,
        });
        self
    }

    /// Adds a parameter with a default value.
    pub fn optional(
        mut self,
        name: impl Into<String>,
        ty: impl IntoTypeDescriptor,
        default: Value,
    ) -> Self {
        let ty = self.record(ty.into_type());
        self.params.push(DeclaredParam {
            name: name.into(),
            ty,
            default: Some(default),
        });
        self
    }

    /// Adds a parameter without a declared type. Registration rejects it.
    pub fn untyped(mut self, name: impl Into<String>) -> Self {
        self.params.push(DeclaredParam {
            name: name.into(),
            ty: None,
            default: None,
        });
        self
    }

    pub fn returns(mut self, ty: impl IntoTypeDescriptor) -> Self {
        self.returns = self.record(ty.into_type());
        self
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    /// Sets the callable for a single-valued method.
    pub fn handler<F, R>(mut self, f: F) -> Self
    where
        F: Fn(&mut RequestContext, Args) -> Result<R, CallError> + Send + Sync + 'static,
        R: Serialize,
    {
        self.handler = Some(Handler::Unary(Arc::new(move |ctx: &mut RequestContext, args: Args| {
            let result = f(ctx, args)?;
            Ok(serde_json::to_value(result)?)
        })));
        self
    }

    /// Sets the callable for a method returning `stream[T]`.
    pub fn stream_handler<F, S, T>(mut self, f: F) -> Self
    where
        F: Fn(&mut RequestContext, Args) -> Result<S, CallError> + Send + Sync + 'static,
        S: IntoIterator<Item = Result<T, CallError>>,
        S::IntoIter: Send + 'static,
        T: Serialize,
    {
        self.handler = Some(Handler::Stream(Arc::new(move |ctx: &mut RequestContext, args: Args| {
            let items = f(ctx, args)?.into_iter();
            let stream: ValueStream =
                Box::new(items.map(|item| item.and_then(|v| Ok(serde_json::to_value(v)?))));
            Ok(stream)
        })));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Validates the declaration and produces the registry entry.
    pub(crate) fn build(
        self,
        owner: Arc<dyn ApiFragment>,
        version: &str,
        namespace: &Namespace,
    ) -> Result<MethodEntry, CoreError> {
        if let Some(e) = self.error {
            return Err(e);
        }

        let name = self.name;
        if name.is_empty() || name.contains('/') {
            return Err(CoreError::InvalidMethod {
                method: name,
                reason: "method names must be non-empty and must not contain '/'".into(),
            });
        }

        let mut seen = HashSet::new();
        let mut params = Vec::with_capacity(self.params.len());
        for p in self.params {
            let ty = p.ty.ok_or_else(|| CoreError::TypeNotSpecified {
                arg: p.name.clone(),
            })?;
            if !seen.insert(p.name.clone()) {
                return Err(CoreError::InvalidMethod {
                    method: name,
                    reason: format!("duplicate parameter '{}'", p.name),
                });
            }
            params.push(ParamSpec {
                name: p.name,
                ty,
                required: p.default.is_none(),
                default: p.default,
            });
        }

        let return_type = self.returns.ok_or_else(|| CoreError::TypeNotSpecified {
            arg: format!("{} (return)", name),
        })?;

        if params.iter().filter(|p| p.ty.is_stream()).count() > 1 {
            return Err(CoreError::InvalidMethod {
                method: name,
                reason: "at most one parameter may be a stream".into(),
            });
        }

        let handler = match self.handler {
            Some(h) => h,
            None => {
                return Err(CoreError::InvalidMethod {
                    method: name,
                    reason: "no handler".into(),
                })
            }
        };
        let is_streaming_response = return_type.is_stream();
        match (&handler, is_streaming_response) {
            (Handler::Unary(_), false) | (Handler::Stream(_), true) => {}
            (Handler::Unary(_), true) => {
                return Err(CoreError::InvalidMethod {
                    method: name,
                    reason: "stream return type needs a stream handler".into(),
                })
            }
            (Handler::Stream(_), false) => {
                return Err(CoreError::InvalidMethod {
                    method: name,
                    reason: "stream handler needs a stream return type".into(),
                })
            }
        }

        Ok(MethodEntry {
            name,
            namespace: namespace.clone(),
            version: version.to_string(),
            owner,
            params,
            return_type,
            is_streaming_response,
            doc: self.doc,
            handler,
        })
    }
}

/// An object whose methods are exposed through the registry.
///
/// Handlers typically capture a clone of the `Arc` so that they can call
/// back into the instance.
pub trait ApiFragment: Send + Sync + 'static {
    fn methods(self: Arc<Self>) -> Vec<Method>;

    /// Name shown in logs and API docs.
    fn fragment_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A registered method. Immutable once in the registry.
pub struct MethodEntry {
    pub name: String,
    pub namespace: Namespace,
    pub version: String,
    pub owner: Arc<dyn ApiFragment>,
    pub params: Vec<ParamSpec>,
    pub return_type: TypeDescriptor,
    pub is_streaming_response: bool,
    pub doc: Option<String>,
    handler: Handler,
}

impl MethodEntry {
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Runs the callable.
    ///
    /// A streamed result is returned unforced.
    pub fn invoke(&self, ctx: &mut RequestContext, args: Args) -> Result<Output, CallError> {
        match &self.handler {
            Handler::Unary(f) => f(ctx, args).map(Output::Value),
            Handler::Stream(f) => f(ctx, args).map(Output::Stream),
        }
    }
}

impl fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodEntry")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("version", &self.version)
            .field("owner", &self.owner.fragment_name())
            .field("params", &self.params)
            .field("return_type", &self.return_type)
            .field("is_streaming_response", &self.is_streaming_response)
            .field("doc", &self.doc)
            .finish()
    }
}
