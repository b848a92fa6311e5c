//! Invocation argument lookup.
//!
//! Simulators hand plugins the raw command line they were launched with.
//! Options reach the bridge in one of two spellings:
//!
//! ```text
//! -socket /tmp/sim.sock
//! +socket+/tmp/sim.sock
//! ```
//!
//! The plus form is what most simulators forward untouched as a plus-arg, so
//! both are accepted and the first one found in vector order wins.

use serde::{Deserialize, Serialize};

/// Separators accepted between the option name and an embedded value.
const PLUS_SEPARATORS: [char; 2] = ['+', '='];

/// The simulator's invocation vector.
///
/// Immutable for the lifetime of the run; lookups return views into it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationArgs {
    args: Vec<String>,
}

impl InvocationArgs {
    /// Wraps an invocation vector.
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the raw elements in order.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.args
    }

    /// Returns true if no arguments were supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Returns the value of option `name`, or `None` if it was not supplied.
    ///
    /// `-name value` takes the following element as the value; a trailing
    /// `-name` with nothing after it is treated as not supplied. `+name+value`
    /// (or `+name=value`) takes everything after the separator, which may be
    /// empty.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&str> {
        for (idx, arg) in self.args.iter().enumerate() {
            if let Some(rest) = arg.strip_prefix('-') {
                if rest == name {
                    return self.args.get(idx + 1).map(String::as_str);
                }
            }
            if let Some(value) = plus_value(arg, name) {
                return Some(value);
            }
        }
        None
    }

    /// Returns true if `name` appears as a bare switch (`+name` or `-name`).
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        self.args.iter().any(|arg| {
            arg.strip_prefix('+')
                .or_else(|| arg.strip_prefix('-'))
                .is_some_and(|rest| rest == name)
        })
    }
}

impl<S: Into<String>> FromIterator<S> for InvocationArgs {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

fn plus_value<'a>(arg: &'a str, name: &str) -> Option<&'a str> {
    let rest = arg.strip_prefix('+')?.strip_prefix(name)?;
    let mut chars = rest.chars();
    let sep = chars.next()?;
    PLUS_SEPARATORS.contains(&sep).then(|| chars.as_str())
}
