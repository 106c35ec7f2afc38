//! Call-signature key codec.
//!
//! Turns the arguments of a memoized call into one opaque string. Two calls
//! with identical positional and keyword arguments (keywords in the same
//! order) always produce the same key.
//!
//! # Format
//!
//! ```text
//! (p1, p2, ...; name1=v1, name2=v2, ...)
//! ```
//!
//! Every value is rendered as compact JSON. The `; ` section is omitted when
//! there are no keyword arguments.

use std::fmt::Write as _;

use genetwork_core::CodecError;
use serde::Serialize;
use serde_json::Value;

/// Positional and keyword arguments of one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    positional: Vec<Value>,
    keyword: Vec<(String, Value)>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpret a serializable value as a positional argument list.
    ///
    /// Sequences and tuples contribute one positional argument per element,
    /// unit contributes none, anything else is a single positional argument.
    pub fn from_value<A: Serialize + ?Sized>(args: &A) -> Result<Self, CodecError> {
        let positional = match to_json(args)? {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        };
        Ok(Self {
            positional,
            keyword: Vec::new(),
        })
    }

    /// Append a positional argument.
    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, CodecError> {
        self.positional.push(to_json(value)?);
        Ok(self)
    }

    /// Append a keyword argument. Insertion order is part of the key.
    pub fn kwarg<T: Serialize + ?Sized>(
        mut self,
        name: impl Into<String>,
        value: &T,
    ) -> Result<Self, CodecError> {
        self.keyword.push((name.into(), to_json(value)?));
        Ok(self)
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn keyword(&self) -> &[(String, Value)] {
        &self.keyword
    }

    /// Render the canonical key.
    pub fn encode(&self) -> String {
        let mut out = String::from("(");
        for (i, value) in self.positional.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            // Writing into a String cannot fail.
            let _ = write!(out, "{value}");
        }
        if !self.keyword.is_empty() {
            out.push_str("; ");
            for (i, (name, value)) in self.keyword.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{name}={value}");
            }
        }
        out.push(')');
        out
    }
}

/// Canonical key for a serializable argument value.
pub fn canonicalize<A: Serialize + ?Sized>(args: &A) -> Result<String, CodecError> {
    CallArgs::from_value(args).map(|args| args.encode())
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<Value, CodecError> {
    serde_json::to_value(value).map_err(|e| CodecError::Serialization {
        reason: e.to_string(),
    })
}
