//! Argument binding and type coercion.
//!
//! Raw arguments arrive in one of three shapes: text from a query string or
//! an unstructured body, already-typed data from a structured codec, or a
//! lazily decoded stream. Text is parsed according to the declared scalar
//! type; composite types only accept structured data.

use crate::context::RequestContext;
use crate::error::CoreError;
use crate::method::{Arg, Args, CallError, ParamSpec, ValueStream};
use crate::types::{ScalarKind, TypeDescriptor};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;

/// One argument as received by the dispatcher.
pub enum RawArg {
    Text(String),
    Data(Value),
    Stream(ValueStream),
}

impl std::fmt::Debug for RawArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawArg::Text(s) => f.debug_tuple("Text").field(s).finish(),
            RawArg::Data(v) => f.debug_tuple("Data").field(v).finish(),
            RawArg::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

pub type RawParams = HashMap<String, RawArg>;

/// Binds raw arguments to the declared parameters.
///
/// Missing required parameters and undeclared arguments both fail with
/// `KeywordArgumentError`. A stream parameter is recorded in
/// `ctx.streaming_input` and its elements are coerced as they are pulled.
pub fn bind(
    params: &[ParamSpec],
    mut raw: RawParams,
    ctx: &mut RequestContext,
) -> Result<Args, CoreError> {
    let mut unknown: Vec<&str> = raw
        .keys()
        .filter(|k| !params.iter().any(|p| &p.name == *k))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        unknown.sort_unstable();
        return Err(CoreError::KeywordArgument {
            reason: format!("unexpected keyword argument(s): {}", unknown.join(", ")),
        });
    }

    for (name, arg) in &raw {
        match arg {
            RawArg::Text(s) => {
                ctx.raw_params.insert(name.clone(), Value::String(s.clone()));
            }
            RawArg::Data(v) => {
                ctx.raw_params.insert(name.clone(), v.clone());
            }
            RawArg::Stream(_) => {}
        }
    }

    let mut args = Args::new();
    for param in params {
        let arg = match raw.remove(&param.name) {
            Some(value) => coerce_arg(param, value, ctx)?,
            None => match &param.default {
                Some(default) => Arg::Value(default.clone()),
                None => {
                    return Err(CoreError::KeywordArgument {
                        reason: format!("missing required argument \"{}\"", param.name),
                    })
                }
            },
        };
        args.insert(param.name.clone(), arg);
    }
    Ok(args)
}

fn coerce_arg(param: &ParamSpec, raw: RawArg, ctx: &mut RequestContext) -> Result<Arg, CoreError> {
    let Some(item) = param.ty.stream_item() else {
        return match raw {
            RawArg::Text(text) => Ok(Arg::Value(coerce_text(&param.ty, &text)?)),
            RawArg::Data(value) => Ok(Arg::Value(coerce_value(&param.ty, value)?)),
            RawArg::Stream(_) => Err(CoreError::unsupported(
                &param.ty,
                format!("parameter \"{}\" does not accept a stream", param.name),
            )),
        };
    };

    let item = item.clone();
    let stream: ValueStream = match raw {
        RawArg::Stream(source) => Box::new(source.map(move |element| {
            element.and_then(|v| coerce_value(&item, v).map_err(CallError::from))
        })),
        RawArg::Data(Value::Array(items)) => Box::new(
            items
                .into_iter()
                .map(move |v| coerce_value(&item, v).map_err(CallError::from)),
        ),
        RawArg::Data(_) | RawArg::Text(_) => {
            return Err(CoreError::unsupported(
                &param.ty,
                format!("parameter \"{}\" expects a sequence", param.name),
            ))
        }
    };
    ctx.streaming_input.insert(param.name.clone());
    Ok(Arg::Stream(stream))
}

/// Parses a textual argument.
pub fn coerce_text(ty: &TypeDescriptor, text: &str) -> Result<Value, CoreError> {
    match ty {
        TypeDescriptor::Scalar(ScalarKind::Int) => text
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|e| CoreError::unsupported(ty, format!("'{}': {}", text, e))),
        TypeDescriptor::Scalar(ScalarKind::Float) => {
            let f = text
                .trim()
                .parse::<f64>()
                .map_err(|e| CoreError::unsupported(ty, format!("'{}': {}", text, e)))?;
            float_value(ty, f)
        }
        TypeDescriptor::Scalar(ScalarKind::Str) | TypeDescriptor::Any => {
            Ok(Value::String(text.to_string()))
        }
        TypeDescriptor::Scalar(ScalarKind::Bool) => parse_bool(text)
            .map(Value::Bool)
            .ok_or_else(|| CoreError::unsupported(ty, format!("'{}' is not a boolean", text))),
        TypeDescriptor::Nothing => match text.trim() {
            "" | "none" | "None" | "null" => Ok(Value::Null),
            _ => Err(CoreError::unsupported(ty, format!("'{}' is not empty", text))),
        },
        TypeDescriptor::UnionOf(alts) => alts
            .iter()
            .find_map(|alt| coerce_text(alt, text).ok())
            .ok_or_else(|| CoreError::unsupported(ty, format!("no alternative accepts '{}'", text))),
        TypeDescriptor::ListOf(_)
        | TypeDescriptor::MapOf(_, _)
        | TypeDescriptor::TupleOf(_)
        | TypeDescriptor::StreamOf(_) => Err(CoreError::unsupported(
            ty,
            "composite values must be sent with a structured protocol",
        )),
    }
}

/// Checks (and where lossless, converts) an already-typed argument.
pub fn coerce_value(ty: &TypeDescriptor, value: Value) -> Result<Value, CoreError> {
    match (ty, value) {
        (TypeDescriptor::Any, v) => Ok(v),
        (TypeDescriptor::Scalar(_) | TypeDescriptor::Nothing, Value::String(s)) => {
            coerce_text(ty, &s)
        }
        (TypeDescriptor::Scalar(ScalarKind::Int), Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::from(i))
            } else if let Some(f) = n.as_f64().filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15) {
                Ok(Value::from(f as i64))
            } else {
                Err(CoreError::unsupported(ty, format!("{} is not an integer", n)))
            }
        }
        (TypeDescriptor::Scalar(ScalarKind::Float), Value::Number(n)) => match n.as_f64() {
            Some(f) => float_value(ty, f),
            None => Err(CoreError::unsupported(ty, format!("{} is not a float", n))),
        },
        (TypeDescriptor::Scalar(ScalarKind::Bool), Value::Bool(b)) => Ok(Value::Bool(b)),
        (TypeDescriptor::Nothing, Value::Null) => Ok(Value::Null),
        (TypeDescriptor::ListOf(inner), Value::Array(items)) => items
            .into_iter()
            .map(|v| coerce_value(inner, v))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        (TypeDescriptor::TupleOf(types), Value::Array(items)) => {
            if types.len() != items.len() {
                return Err(CoreError::unsupported(
                    ty,
                    format!("expected {} elements, got {}", types.len(), items.len()),
                ));
            }
            types
                .iter()
                .zip(items)
                .map(|(t, v)| coerce_value(t, v))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        (TypeDescriptor::MapOf(key_ty, value_ty), Value::Object(map)) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                coerce_text(key_ty, &k)?;
                out.insert(k, coerce_value(value_ty, v)?);
            }
            Ok(Value::Object(out))
        }
        (TypeDescriptor::UnionOf(alts), v) => alts
            .iter()
            .find_map(|alt| coerce_value(alt, v.clone()).ok())
            .ok_or_else(|| CoreError::unsupported(ty, format!("no alternative accepts {}", v))),
        (_, v) => Err(CoreError::unsupported(ty, format!("got {}", kind_of(&v)))),
    }
}

fn float_value(ty: &TypeDescriptor, f: f64) -> Result<Value, CoreError> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| CoreError::unsupported(ty, format!("{} is not a finite number", f)))
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "on" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn param(name: &str, ty: &str) -> ParamSpec {
        ParamSpec {
            name: name.to_string(),
            ty: TypeDescriptor::parse(ty).unwrap(),
            required: true,
            default: None,
        }
    }

    fn with_default(name: &str, ty: &str, default: Value) -> ParamSpec {
        ParamSpec {
            required: false,
            default: Some(default),
            ..param(name, ty)
        }
    }

    fn text(pairs: &[(&str, &str)]) -> RawParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), RawArg::Text(v.to_string())))
            .collect()
    }

    #[test]
    fn test_bind_text_scalars() {
        let params = [param("a", "int"), param("b", "float"), param("c", "bool")];
        let mut ctx = RequestContext::new();
        let args = bind(&params, text(&[("a", "10"), ("b", "2.5"), ("c", "Yes")]), &mut ctx).unwrap();

        assert_eq!(args.value("a"), Some(&json!(10)));
        assert_eq!(args.value("b"), Some(&json!(2.5)));
        assert_eq!(args.value("c"), Some(&json!(true)));
        assert_eq!(ctx.raw_params.get("a"), Some(&json!("10")));
    }

    #[test]
    fn test_bind_defaults_and_missing() {
        let params = [param("a", "int"), with_default("b", "int", json!(5))];
        let mut ctx = RequestContext::new();

        let args = bind(&params, text(&[("a", "1")]), &mut ctx).unwrap();
        assert_eq!(args.value("b"), Some(&json!(5)));

        let err = bind(&params, text(&[("b", "1")]), &mut ctx).unwrap_err();
        assert_eq!(err.error_code().code(), 50010);
        assert!(err.to_string().contains("\"a\""));
    }

    #[test]
    fn test_bind_unknown_argument() {
        let params = [param("a", "int")];
        let mut ctx = RequestContext::new();
        let err = bind(&params, text(&[("a", "1"), ("zz", "2")]), &mut ctx).unwrap_err();
        assert!(matches!(err, CoreError::KeywordArgument { ref reason } if reason.contains("zz")));
    }

    #[test]
    fn test_bind_unparseable_text() {
        let params = [param("a", "int")];
        let mut ctx = RequestContext::new();
        let err = bind(&params, text(&[("a", "ten")]), &mut ctx).unwrap_err();
        assert_eq!(err.error_code().code(), 50006);

        let params = [param("c", "bool")];
        let err = bind(&params, text(&[("c", "maybe")]), &mut ctx).unwrap_err();
        assert_eq!(err.error_code().code(), 50006);
    }

    #[test]
    fn test_composite_text_rejected() {
        for ty in ["list[int]", "dict[str, int]", "tuple[int, int]"] {
            let err = coerce_text(&TypeDescriptor::parse(ty).unwrap(), "1,2").unwrap_err();
            assert!(matches!(err, CoreError::UnsupportedType { .. }), "type {}", ty);
        }
    }

    #[test]
    fn test_structured_values() {
        let ty = TypeDescriptor::parse("list[float]").unwrap();
        assert_eq!(coerce_value(&ty, json!([1, 2.5])).unwrap(), json!([1.0, 2.5]));

        let ty = TypeDescriptor::parse("dict[int, str]").unwrap();
        assert!(coerce_value(&ty, json!({"1": "a"})).is_ok());
        assert!(coerce_value(&ty, json!({"x": "a"})).is_err());

        let ty = TypeDescriptor::parse("tuple[int, str]").unwrap();
        assert_eq!(coerce_value(&ty, json!([1, "a"])).unwrap(), json!([1, "a"]));
        assert!(coerce_value(&ty, json!([1])).is_err());

        let ty = TypeDescriptor::INT;
        assert_eq!(coerce_value(&ty, json!(3.0)).unwrap(), json!(3));
        assert_eq!(coerce_value(&ty, json!("7")).unwrap(), json!(7));
        assert!(coerce_value(&ty, json!(3.5)).is_err());
        assert!(coerce_value(&ty, json!(true)).is_err());
    }

    #[test]
    fn test_union_first_match_wins() {
        let ty = TypeDescriptor::parse("int | str").unwrap();
        assert_eq!(coerce_text(&ty, "12").unwrap(), json!(12));
        assert_eq!(coerce_text(&ty, "twelve").unwrap(), json!("twelve"));

        let ty = TypeDescriptor::parse("int | bool").unwrap();
        assert!(coerce_text(&ty, "maybe").is_err());

        let ty = TypeDescriptor::optional(TypeDescriptor::INT);
        assert_eq!(coerce_value(&ty, Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_stream_param_is_lazy() {
        let params = [param("items", "stream[int]")];
        let mut ctx = RequestContext::new();

        let source: ValueStream = Box::new(
            vec![Ok::<_, CallError>(json!(1)), Ok(json!("2")), Ok(json!("x"))].into_iter(),
        );
        let mut raw = RawParams::new();
        raw.insert("items".into(), RawArg::Stream(source));

        let mut args = bind(&params, raw, &mut ctx).unwrap();
        assert!(ctx.is_streaming_input("items"));
        assert!(ctx.raw_params.is_empty());

        let mut stream = args.take_stream("items").unwrap();
        assert_eq!(stream.next().unwrap().unwrap(), json!(1));
        assert_eq!(stream.next().unwrap().unwrap(), json!(2));
        assert_eq!(stream.next().unwrap().unwrap_err().code(), 50006);
    }

    #[test]
    fn test_stream_param_from_array_and_text() {
        let params = [param("items", "stream[str]")];
        let mut ctx = RequestContext::new();

        let mut raw = RawParams::new();
        raw.insert("items".into(), RawArg::Data(json!(["a", "b"])));
        let mut args = bind(&params, raw, &mut ctx).unwrap();
        assert_eq!(args.take_stream("items").unwrap().count(), 2);

        let err = bind(&params, text(&[("items", "a,b")]), &mut ctx).unwrap_err();
        assert_eq!(err.error_code().code(), 50006);
    }

    proptest! {
        #[test]
        fn prop_int_text_roundtrip(n in any::<i64>()) {
            prop_assert_eq!(coerce_text(&TypeDescriptor::INT, &n.to_string()).unwrap(), json!(n));
        }

        #[test]
        fn prop_bool_text_case_insensitive(b in any::<bool>(), upper in any::<bool>()) {
            let text = if upper { b.to_string().to_uppercase() } else { b.to_string() };
            prop_assert_eq!(coerce_text(&TypeDescriptor::BOOL, &text).unwrap(), json!(b));
        }
    }
}
