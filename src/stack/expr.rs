//! Defines the CloudFormation intrinsic expressions used to wire
//! resources together.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Serialize, Serializer};
use serde_json::{json, Value};

/// Matches `${Name}` and `${Name.Attribute}` substitutions, but not
/// the escaped `${!Literal}` form.
static SUB_VARIABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z0-9:]+)(?:\.[A-Za-z0-9.]+)?\}").unwrap());

/// A value in a template that is either known at synthesis time or
/// resolved by the provider at deploy time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    /// A plain string.
    Literal(String),

    /// `{"Ref": id}`: a resource's primary identifier, or a pseudo
    /// parameter such as `AWS::Region`.
    Ref(String),

    /// `{"Fn::GetAtt": [id, attribute]}`.
    GetAtt(String, String),

    /// `{"Fn::ImportValue": export}`: an output exported by another
    /// stack.
    ImportValue(String),

    /// `{"Fn::Sub": template}` with `${...}` substitutions.
    Sub(String),
}

impl Expr {
    pub fn literal(value: impl Into<String>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn reference(logical_id: impl Into<String>) -> Self {
        Expr::Ref(logical_id.into())
    }

    pub fn get_att(logical_id: impl Into<String>, attribute: impl Into<String>) -> Self {
        Expr::GetAtt(logical_id.into(), attribute.into())
    }

    pub fn import(export_name: impl Into<String>) -> Self {
        Expr::ImportValue(export_name.into())
    }

    pub fn sub(template: impl Into<String>) -> Self {
        Expr::Sub(template.into())
    }

    /// The region the stack is deployed into.
    pub fn region() -> Self {
        Expr::reference("AWS::Region")
    }

    /// Logical ids of resources in the same template this expression
    /// depends on. Pseudo parameters and imports aren't included.
    pub fn referenced_ids(&self) -> Vec<String> {
        match self {
            Expr::Ref(id) if !is_pseudo_parameter(id) => vec![id.clone()],
            Expr::GetAtt(id, _) => vec![id.clone()],
            Expr::Sub(template) => sub_variables(template),
            _ => Vec::new(),
        }
    }

    /// Render the expression as template JSON.
    pub fn to_value(&self) -> Value {
        match self {
            Expr::Literal(value) => Value::String(value.clone()),
            Expr::Ref(id) => json!({ "Ref": id }),
            Expr::GetAtt(id, attribute) => json!({ "Fn::GetAtt": [id, attribute] }),
            Expr::ImportValue(export) => json!({ "Fn::ImportValue": export }),
            Expr::Sub(template) => json!({ "Fn::Sub": template }),
        }
    }
}

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Expr::literal(value)
    }
}

/// Pseudo parameters are provided by CloudFormation itself.
pub fn is_pseudo_parameter(name: &str) -> bool {
    name.starts_with("AWS::")
}

/// Names substituted inside a `Fn::Sub` template, skipping pseudo
/// parameters.
pub fn sub_variables(template: &str) -> Vec<String> {
    SUB_VARIABLE_RE
        .captures_iter(template)
        .filter_map(|captures| captures.get(1))
        .map(|name| name.as_str())
        .filter(|name| !is_pseudo_parameter(name))
        .map(String::from)
        .collect()
}
