//! Type descriptors for parameters and return values.
//!
//! Descriptors are written as short type expressions:
//!
//! - `int`, `float`, `str`, `bool` - scalars
//! - `none` - the absence of a value
//! - `any` - accepted as-is
//! - `list[T]` - homogeneous sequence
//! - `dict[K, V]` - mapping (keys travel as strings)
//! - `tuple[A, B, ...]` - fixed-length heterogeneous sequence
//! - `union[A, B, ...]` or `A | B` - first alternative that accepts the value
//! - `optional[T]` - shorthand for `union[T, none]`
//! - `stream[T]` - lazily produced sequence of `T`

use crate::error::CoreError;
use std::fmt;
use std::str::FromStr;

/// Scalar kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Int,
    Float,
    Str,
    Bool,
}

impl ScalarKind {
    pub fn name(&self) -> &'static str {
        match self {
            ScalarKind::Int => "int",
            ScalarKind::Float => "float",
            ScalarKind::Str => "str",
            ScalarKind::Bool => "bool",
        }
    }
}

/// A declared parameter or return type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    Scalar(ScalarKind),
    ListOf(Box<TypeDescriptor>),
    MapOf(Box<TypeDescriptor>, Box<TypeDescriptor>),
    TupleOf(Vec<TypeDescriptor>),
    UnionOf(Vec<TypeDescriptor>),
    Any,
    StreamOf(Box<TypeDescriptor>),
    Nothing,
}

impl TypeDescriptor {
    pub const INT: TypeDescriptor = TypeDescriptor::Scalar(ScalarKind::Int);
    pub const FLOAT: TypeDescriptor = TypeDescriptor::Scalar(ScalarKind::Float);
    pub const STR: TypeDescriptor = TypeDescriptor::Scalar(ScalarKind::Str);
    pub const BOOL: TypeDescriptor = TypeDescriptor::Scalar(ScalarKind::Bool);

    pub fn list_of(inner: TypeDescriptor) -> Self {
        TypeDescriptor::ListOf(Box::new(inner))
    }

    pub fn map_of(key: TypeDescriptor, value: TypeDescriptor) -> Self {
        TypeDescriptor::MapOf(Box::new(key), Box::new(value))
    }

    pub fn stream_of(inner: TypeDescriptor) -> Self {
        TypeDescriptor::StreamOf(Box::new(inner))
    }

    pub fn optional(inner: TypeDescriptor) -> Self {
        TypeDescriptor::UnionOf(vec![inner, TypeDescriptor::Nothing])
    }

    /// Parses a type expression.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(invalid(s, "empty type expression"));
        }

        let mut parser = Parser::new(s);
        let ty = parser.parse_union()?;
        parser.skip_whitespace();
        if parser.pos != s.len() {
            return Err(invalid(s, format!("unexpected input at offset {}", parser.pos)));
        }
        ty.check_streams(true).map_err(|reason| invalid(s, reason))?;
        Ok(ty)
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, TypeDescriptor::StreamOf(_))
    }

    /// Element type of a stream, if this is one.
    pub fn stream_item(&self) -> Option<&TypeDescriptor> {
        match self {
            TypeDescriptor::StreamOf(inner) => Some(inner),
            _ => None,
        }
    }

    /// Whether values of this type may arrive as a query-string fragment.
    pub fn is_textual(&self) -> bool {
        match self {
            TypeDescriptor::Scalar(_) | TypeDescriptor::Any | TypeDescriptor::Nothing => true,
            TypeDescriptor::UnionOf(alts) => alts.iter().all(|t| t.is_textual()),
            _ => false,
        }
    }

    /// `stream[T]` is only meaningful at the top level.
    fn check_streams(&self, top: bool) -> Result<(), String> {
        match self {
            TypeDescriptor::StreamOf(inner) if top => inner.check_streams(false),
            TypeDescriptor::StreamOf(_) => Err("stream[...] may only appear at the top level".into()),
            TypeDescriptor::ListOf(inner) => inner.check_streams(false),
            TypeDescriptor::MapOf(k, v) => {
                k.check_streams(false)?;
                v.check_streams(false)
            }
            TypeDescriptor::TupleOf(items) | TypeDescriptor::UnionOf(items) => {
                items.iter().try_for_each(|t| t.check_streams(false))
            }
            _ => Ok(()),
        }
    }
}

impl FromStr for TypeDescriptor {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TypeDescriptor::parse(s)
    }
}

fn join(f: &mut fmt::Formatter<'_>, items: &[TypeDescriptor]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Scalar(kind) => f.write_str(kind.name()),
            TypeDescriptor::ListOf(inner) => write!(f, "list[{}]", inner),
            TypeDescriptor::MapOf(k, v) => write!(f, "dict[{}, {}]", k, v),
            TypeDescriptor::TupleOf(items) => {
                f.write_str("tuple[")?;
                join(f, items)?;
                f.write_str("]")
            }
            TypeDescriptor::UnionOf(items) => {
                f.write_str("union[")?;
                join(f, items)?;
                f.write_str("]")
            }
            TypeDescriptor::Any => f.write_str("any"),
            TypeDescriptor::StreamOf(inner) => write!(f, "stream[{}]", inner),
            TypeDescriptor::Nothing => f.write_str("none"),
        }
    }
}

fn invalid(expr: &str, reason: impl Into<String>) -> CoreError {
    CoreError::InvalidType {
        expr: expr.to_string(),
        reason: reason.into(),
    }
}

/// Recursive descent parser for type expressions.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse_union(&mut self) -> Result<TypeDescriptor, CoreError> {
        let first = self.parse_primary()?;
        self.skip_whitespace();
        if self.peek_char() != Some('|') {
            return Ok(first);
        }

        let mut alts = vec![first];
        while self.peek_char() == Some('|') {
            self.pos += 1;
            alts.push(self.parse_primary()?);
            self.skip_whitespace();
        }
        Ok(TypeDescriptor::UnionOf(alts))
    }

    fn parse_primary(&mut self) -> Result<TypeDescriptor, CoreError> {
        self.skip_whitespace();
        let name = self.parse_ident()?;
        self.skip_whitespace();

        let args = if self.peek_char() == Some('[') {
            self.pos += 1;
            let args = self.parse_args()?;
            Some(args)
        } else {
            None
        };

        match (name, args) {
            ("int", None) => Ok(TypeDescriptor::INT),
            ("float", None) => Ok(TypeDescriptor::FLOAT),
            ("str", None) => Ok(TypeDescriptor::STR),
            ("bool", None) => Ok(TypeDescriptor::BOOL),
            ("any", None) => Ok(TypeDescriptor::Any),
            ("none", None) => Ok(TypeDescriptor::Nothing),
            ("list", Some(args)) => {
                let [inner] = self.expect_args::<1>(name, args)?;
                Ok(TypeDescriptor::list_of(inner))
            }
            ("dict", Some(args)) => {
                let [k, v] = self.expect_args::<2>(name, args)?;
                Ok(TypeDescriptor::map_of(k, v))
            }
            ("optional", Some(args)) => {
                let [inner] = self.expect_args::<1>(name, args)?;
                Ok(TypeDescriptor::optional(inner))
            }
            ("stream", Some(args)) => {
                let [inner] = self.expect_args::<1>(name, args)?;
                Ok(TypeDescriptor::stream_of(inner))
            }
            ("tuple", Some(args)) => Ok(TypeDescriptor::TupleOf(args)),
            ("union", Some(args)) => Ok(TypeDescriptor::UnionOf(args)),
            ("list" | "dict" | "optional" | "stream" | "tuple" | "union", None) => Err(
                invalid(self.input, format!("'{}' needs type arguments", name)),
            ),
            (_, Some(_)) if is_scalar_name(name) => Err(invalid(
                self.input,
                format!("'{}' does not take type arguments", name),
            )),
            _ => Err(invalid(self.input, format!("unknown type '{}'", name))),
        }
    }

    /// Parses `T, U, ...]` after the opening bracket.
    fn parse_args(&mut self) -> Result<Vec<TypeDescriptor>, CoreError> {
        let mut args = Vec::new();
        loop {
            args.push(self.parse_union()?);
            self.skip_whitespace();
            match self.peek_char() {
                Some(',') => self.pos += 1,
                Some(']') => {
                    self.pos += 1;
                    return Ok(args);
                }
                Some(c) => {
                    return Err(invalid(
                        self.input,
                        format!("expected ',' or ']' but found '{}'", c),
                    ))
                }
                None => return Err(invalid(self.input, "expected ']'")),
            }
        }
    }

    fn expect_args<const N: usize>(
        &self,
        name: &str,
        args: Vec<TypeDescriptor>,
    ) -> Result<[TypeDescriptor; N], CoreError> {
        let count = args.len();
        args.try_into().map_err(|_| {
            invalid(
                self.input,
                format!("'{}' takes {} type argument(s), got {}", name, N, count),
            )
        })
    }

    fn parse_ident(&mut self) -> Result<&'a str, CoreError> {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if start == self.pos {
            return Err(invalid(
                self.input,
                format!("expected a type name at offset {}", start),
            ));
        }
        Ok(&self.input[start..self.pos])
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }
}

fn is_scalar_name(name: &str) -> bool {
    matches!(name, "int" | "float" | "str" | "bool" | "any" | "none")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scalars() {
        assert_eq!(TypeDescriptor::parse("int").unwrap(), TypeDescriptor::INT);
        assert_eq!(TypeDescriptor::parse(" str ").unwrap(), TypeDescriptor::STR);
        assert_eq!(TypeDescriptor::parse("any").unwrap(), TypeDescriptor::Any);
        assert_eq!(TypeDescriptor::parse("none").unwrap(), TypeDescriptor::Nothing);
    }

    #[test]
    fn test_parse_composites() {
        assert_eq!(
            TypeDescriptor::parse("list[int]").unwrap(),
            TypeDescriptor::list_of(TypeDescriptor::INT)
        );
        assert_eq!(
            TypeDescriptor::parse("dict[str, list[float]]").unwrap(),
            TypeDescriptor::map_of(
                TypeDescriptor::STR,
                TypeDescriptor::list_of(TypeDescriptor::FLOAT)
            )
        );
        assert_eq!(
            TypeDescriptor::parse("tuple[int, str, bool]").unwrap(),
            TypeDescriptor::TupleOf(vec![
                TypeDescriptor::INT,
                TypeDescriptor::STR,
                TypeDescriptor::BOOL
            ])
        );
        assert_eq!(
            TypeDescriptor::parse("stream[dict[str, any]]").unwrap(),
            TypeDescriptor::stream_of(TypeDescriptor::map_of(
                TypeDescriptor::STR,
                TypeDescriptor::Any
            ))
        );
    }

    #[test]
    fn test_parse_unions() {
        let expected = TypeDescriptor::UnionOf(vec![TypeDescriptor::INT, TypeDescriptor::STR]);
        assert_eq!(TypeDescriptor::parse("int | str").unwrap(), expected);
        assert_eq!(TypeDescriptor::parse("union[int, str]").unwrap(), expected);
        assert_eq!(
            TypeDescriptor::parse("optional[int]").unwrap(),
            TypeDescriptor::optional(TypeDescriptor::INT)
        );
        assert_eq!(
            TypeDescriptor::parse("list[int | float]").unwrap(),
            TypeDescriptor::list_of(TypeDescriptor::UnionOf(vec![
                TypeDescriptor::INT,
                TypeDescriptor::FLOAT
            ]))
        );
    }

    #[test]
    fn test_parse_errors() {
        for expr in [
            "",
            "integer",
            "list",
            "list[",
            "list[int",
            "list[int, str]",
            "dict[str]",
            "int[str]",
            "int str",
            "list[stream[int]]",
            "int |",
        ] {
            assert!(
                matches!(TypeDescriptor::parse(expr), Err(CoreError::InvalidType { .. })),
                "expected failure for {:?}",
                expr
            );
        }
    }

    #[test]
    fn test_display_roundtrip() {
        for expr in [
            "int",
            "list[str]",
            "dict[str, float]",
            "tuple[int, bool]",
            "union[int, none]",
            "stream[list[int]]",
            "any",
        ] {
            let ty = TypeDescriptor::parse(expr).unwrap();
            assert_eq!(ty.to_string(), expr);
            assert_eq!(ty.to_string().parse::<TypeDescriptor>().unwrap(), ty);
        }
    }

    #[test]
    fn test_is_textual() {
        assert!(TypeDescriptor::INT.is_textual());
        assert!(TypeDescriptor::optional(TypeDescriptor::BOOL).is_textual());
        assert!(!TypeDescriptor::list_of(TypeDescriptor::INT).is_textual());
        assert!(!TypeDescriptor::stream_of(TypeDescriptor::INT).is_textual());
    }
}
