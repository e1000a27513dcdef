//! Defines IAM policy statements attached to the function's role.

use crate::stack::expr::Expr;
use itertools::Itertools;
use regex::Regex;
use serde_json::{json, Value};

/// Whether a statement grants or denies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "Allow",
            Effect::Deny => "Deny",
        }
    }
}

/// A single policy statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyStatement {
    pub effect: Effect,
    pub actions: Vec<String>,
    pub resources: Vec<Expr>,
}

impl PolicyStatement {
    pub fn allow<A, R>(actions: A, resources: R) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator<Item = Expr>,
    {
        PolicyStatement {
            effect: Effect::Allow,
            actions: actions.into_iter().map(Into::into).collect(),
            resources: resources.into_iter().collect(),
        }
    }

    /// Whether this statement names the given action on the given
    /// resource. Action patterns may use `*` wildcards; resources match
    /// exactly or through a literal `*`.
    pub fn covers(&self, action: &str, resource: &Expr) -> bool {
        self.actions
            .iter()
            .any(|pattern| wildcard_match(pattern, action))
            && self
                .resources
                .iter()
                .any(|r| r == resource || *r == Expr::literal("*"))
    }

    pub fn to_value(&self) -> Value {
        json!({
            "Effect": self.effect.as_str(),
            "Action": self.actions,
            "Resource": self.resources,
        })
    }
}

/// Render statements as a policy document.
pub fn document(statements: &[PolicyStatement]) -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": statements.iter().map(PolicyStatement::to_value).collect::<Vec<_>>(),
    })
}

/// Trust policy letting an AWS service assume a role.
pub fn assume_role_document(service: &str) -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": service },
            "Action": "sts:AssumeRole",
        }],
    })
}

/// IAM-style glob where `*` matches any run of characters.
fn wildcard_match(pattern: &str, value: &str) -> bool {
    Regex::new(&format!(
        "^{}$",
        pattern.split('*').map(regex::escape).join(".*")
    ))
    .map(|re| re.is_match(value))
    .unwrap_or(false)
}
