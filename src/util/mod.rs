use itertools::Itertools;

/// Simple macro to prevent boilerplate of `.to_owned()`
///
/// The macro returns a `String` from the given `&str` value.
///
/// # Examples
///
/// ```rust,ignore
/// let value: String = str!("Some custom string");
/// ```
macro_rules! str {
    ($a:expr) => {
        $a.to_owned()
    };
}
pub(crate) use str;

/// Trait providing the `panic()` method that calls the given function and panics with the returned
/// message
///
/// This trait exists to provide the same as `expect()` but with the advantage that you have the
/// error available to include the error into the panic message.
pub trait Expect<F: FnOnce(Self::Error) -> String> {
    type Value;
    type Error;

    fn panic(self, f: F) -> Self::Value;
}

/// Generic implementation of Expect for any Result type
impl<T, E, F: FnOnce(E) -> String> Expect<F> for Result<T, E> {
    type Value = T;
    type Error = E;
    fn panic(self, f: F) -> Self::Value {
        match self {
            Ok(v) => v,
            Err(e) => panic!("{}", f(e)),
        }
    }
}

/// Format register values as `[ 0x0001, 0x0002 ]` for log output
pub fn to_str(values: &[u16]) -> String {
    format!(
        "[ {} ]",
        values.iter().map(|v| format!("{:#06X}", v)).join(", ")
    )
}
