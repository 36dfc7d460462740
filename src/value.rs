//! Wire-level data model: stack frames, scopes, variables/handles, and
//! breakpoints (spec.md §3).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Immutable snapshot of one level of the debuggee's call stack.
///
/// `id` is only valid until the next resume-like state change.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StackFrame {
    pub id: i64,
    pub name: String,
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "lineNumber")]
    pub line_number: u32,
}

/// A variable-reference handle scoped to a stack frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Scope {
    pub name: String,
    pub reference: i64,
    pub expensive: bool,
}

/// A caller-owned breakpoint, keyed by source path at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

/// Verification result for a single breakpoint (protocol v6+ `setBreakpoints`
/// response, or the synthetic all-verified result used on earlier versions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BreakpointVerification {
    pub verified: bool,
}

/// The decoded scalar carried by a primitive variable.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Null,
    Undefined,
}

/// The typed form of a wire `VariableInfo.type` string (DESIGN NOTES: "Dynamic
/// `type` strings -> tagged variants").
#[derive(Debug, Clone, PartialEq)]
pub enum VariableKind {
    Primitive(PrimitiveValue),
    Object { is_array: bool, indexed_count: Option<u32> },
    Function,
    /// Any other wire `type` string, kept verbatim so forward-compatible
    /// debuggee types survive the round trip instead of being rejected.
    Opaque(String),
}

/// The unifying Variable/Handle entity (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    /// Opaque handle into the debuggee's variable table; 0 for primitives.
    pub reference: i64,
    pub kind: VariableKind,
    /// The debuggee's rendered string form, present for every non-primitive.
    pub value_as_string: Option<String>,
}

impl Variable {
    pub fn primitive(&self) -> bool {
        matches!(self.kind, VariableKind::Primitive(_))
    }

    pub fn is_object(&self) -> bool {
        matches!(self.kind, VariableKind::Object { .. })
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, VariableKind::Object { is_array: true, .. })
    }

    pub fn indexed_count(&self) -> Option<u32> {
        match self.kind {
            VariableKind::Object { indexed_count, .. } => indexed_count,
            _ => None,
        }
    }

    /// Build a `Variable` from the raw wire `VariableInfo` shape, applying the
    /// typing rules in spec.md §3.
    pub fn from_wire(raw: RawVariableInfo) -> Self {
        let RawVariableInfo {
            name,
            value,
            ty,
            variables_reference,
            indexed_variables,
        } = raw;

        let kind = match ty.as_str() {
            "string" => VariableKind::Primitive(PrimitiveValue::String(value.unwrap_or_default())),
            "integer" => VariableKind::Primitive(PrimitiveValue::Integer(
                value.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0),
            )),
            "float" => VariableKind::Primitive(PrimitiveValue::Float(
                value.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0.0),
            )),
            "boolean" => {
                VariableKind::Primitive(PrimitiveValue::Boolean(value.as_deref() == Some("true")))
            }
            "null" => VariableKind::Primitive(PrimitiveValue::Null),
            "undefined" => VariableKind::Primitive(PrimitiveValue::Undefined),
            "object" => VariableKind::Object {
                is_array: indexed_variables.is_some(),
                indexed_count: indexed_variables,
            },
            "function" => VariableKind::Function,
            other => VariableKind::Opaque(other.to_string()),
        };

        let value_as_string = match &kind {
            VariableKind::Primitive(_) => None,
            _ => value.clone(),
        };

        Variable {
            name,
            reference: variables_reference,
            kind,
            value_as_string,
        }
    }

    /// Build a synthetic `Variable` named `"result"` from an `evaluate`
    /// response body (spec.md §4.3 `evaluate`).
    pub fn from_evaluate_body(body: &Value) -> Self {
        let raw = RawVariableInfo {
            name: "result".to_string(),
            value: body.get("result").and_then(Value::as_str).map(str::to_string),
            ty: body
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("undefined")
                .to_string(),
            variables_reference: body
                .get("variablesReference")
                .and_then(Value::as_i64)
                .unwrap_or(0),
            indexed_variables: body
                .get("indexedVariables")
                .and_then(Value::as_u64)
                .map(|v| v as u32),
        };
        Variable::from_wire(raw)
    }
}

/// The raw `VariableInfo` shape as it appears on the wire, before typing.
#[derive(Debug, Clone, Deserialize)]
pub struct RawVariableInfo {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(rename = "variablesReference", default)]
    pub variables_reference: i64,
    #[serde(rename = "indexedVariables", default)]
    pub indexed_variables: Option<u32>,
}
