//! Sample API fragments served by the binary.

use kwikapi_core::{ApiFragment, CallError, Method, TypeDescriptor};
use std::sync::Arc;

/// Arithmetic endpoints.
pub struct Calc;

impl ApiFragment for Calc {
    fn methods(self: Arc<Self>) -> Vec<Method> {
        vec![
            Method::from_signature("add(a: int, b: int) -> int")
                .doc("Sum of two integers")
                .handler(|_, args| Ok(args.i64("a")? + args.i64("b")?)),
            Method::from_signature("subtract(a: int, b: int) -> int")
                .handler(|_, args| Ok(args.i64("a")? - args.i64("b")?)),
            Method::new("divide")
                .param("a", TypeDescriptor::FLOAT)
                .param("b", TypeDescriptor::FLOAT)
                .returns(TypeDescriptor::FLOAT)
                .doc("Fails with code 1101 when b is zero")
                .handler(|_, args| {
                    let b = args.f64("b")?;
                    if b == 0.0 {
                        return Err(CallError::new(1101, "b can't be zero"));
                    }
                    Ok(args.f64("a")? / b)
                }),
            Method::from_signature("counter(n: int = 10, step: int = 1) -> stream[int]")
                .doc("Yields n numbers starting at zero")
                .stream_handler(|_, args| {
                    let n = args.i64("n")?.max(0);
                    let step = args.i64("step")?;
                    Ok((0..n).map(move |i| Ok(i * step)))
                }),
            Method::from_signature("sum(numbers: stream[float]) -> float")
                .doc("Sum of a streamed sequence")
                .handler(|_, mut args| {
                    let mut total = 0.0;
                    for number in args.take_stream("numbers")? {
                        total += number?.as_f64().unwrap_or_default();
                    }
                    Ok(total)
                }),
        ]
    }
}

/// String endpoints, mounted under a nested namespace.
pub struct ConcStr;

impl ApiFragment for ConcStr {
    fn methods(self: Arc<Self>) -> Vec<Method> {
        vec![
            Method::from_signature("add(a: str, b: str) -> str")
                .doc("Concatenation")
                .handler(|_, args| Ok(format!("{}{}", args.str("a")?, args.str("b")?))),
            Method::from_signature("repeat(text: str, times: int = 2, sep: str | none = None) -> str")
                .handler(|_, args| {
                    let times = usize::try_from(args.i64("times")?).unwrap_or_default();
                    let sep: Option<String> = args.get("sep")?;
                    Ok(vec![args.str("text")?; times].join(sep.as_deref().unwrap_or("")))
                }),
        ]
    }
}
