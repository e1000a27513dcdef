//! Defines the compute unit: the function itself, its execution role
//! and the layers attached to it.

use crate::stack::alarm::{Metric, Statistic};
use crate::stack::expr::Expr;
use crate::stack::imports::ImportedTopic;
use crate::stack::policy::{self, PolicyStatement};
use crate::stack::template::{Resource, Template};
use crate::stack::Construct;
use anyhow::Result;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Managed policy that lets the function write its logs.
const BASIC_EXECUTION_POLICY: &str =
    "arn:${AWS::Partition}:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";

/// Location of an uploaded code bundle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Code {
    pub bucket: String,
    pub key: String,
}

impl Code {
    fn to_value(&self) -> Value {
        json!({ "S3Bucket": self.bucket, "S3Key": self.key })
    }
}

/// A layer attached to the function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Layer {
    /// Published by this stack from an uploaded bundle.
    Asset {
        logical_id: String,
        description: String,
        code: Code,
    },

    /// Published elsewhere and referenced by version ARN.
    Arn(Expr),
}

impl Layer {
    /// The layer version ARN as the function sees it.
    pub fn arn(&self) -> Expr {
        match self {
            Layer::Asset { logical_id, .. } => Expr::reference(logical_id),
            Layer::Arn(arn) => arn.clone(),
        }
    }
}

/// The function and everything it is granted.
#[derive(Clone, Debug)]
pub struct FunctionSpec {
    pub logical_id: String,
    pub function_name: String,
    pub handler: String,
    pub runtime: String,
    pub code: Code,
    pub environment: BTreeMap<String, Expr>,
    pub layers: Vec<Layer>,
    pub timeout_seconds: u32,
    pub active_tracing: bool,

    /// Coarse service-wide grants, each on every resource.
    pub permissions: Vec<String>,

    /// Additional statements added to the role policy.
    pub statements: Vec<PolicyStatement>,
}

impl FunctionSpec {
    /// A function with the defaults every function in this app gets:
    /// custom runtime, 30 second timeout and active tracing.
    pub fn new(
        logical_id: impl Into<String>,
        function_name: impl Into<String>,
        code: Code,
    ) -> Self {
        FunctionSpec {
            logical_id: logical_id.into(),
            function_name: function_name.into(),
            handler: String::from("bootstrap"),
            runtime: String::from("provided.al2"),
            code,
            environment: BTreeMap::new(),
            layers: Vec::new(),
            timeout_seconds: 30,
            active_tracing: true,
            permissions: Vec::new(),
            statements: Vec::new(),
        }
    }

    pub fn role_id(&self) -> String {
        format!("{}Role", self.logical_id)
    }

    /// The deployed function name.
    pub fn name(&self) -> Expr {
        Expr::reference(&self.logical_id)
    }

    pub fn arn(&self) -> Expr {
        Expr::get_att(&self.logical_id, "Arn")
    }

    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<Expr>) -> &mut Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn add_layer(&mut self, layer: Layer) -> &mut Self {
        self.layers.push(layer);
        self
    }

    pub fn add_to_role_policy(&mut self, statement: PolicyStatement) -> &mut Self {
        self.statements.push(statement);
        self
    }

    /// Grant every SNS action on the given topics.
    pub fn attach_topics(&mut self, topics: &[&ImportedTopic]) -> &mut Self {
        self.add_to_role_policy(PolicyStatement::allow(
            ["sns:*"],
            topics.iter().map(|topic| topic.arn()),
        ))
    }

    /// Every statement of the role's inline policy, coarse grants
    /// first.
    pub fn policy_statements(&self) -> Vec<PolicyStatement> {
        let mut statements = Vec::with_capacity(self.statements.len() + 1);
        if !self.permissions.is_empty() {
            statements.push(PolicyStatement::allow(
                self.permissions.iter().cloned(),
                [Expr::literal("*")],
            ));
        }
        statements.extend(self.statements.iter().cloned());
        statements
    }

    /// Whether the role may perform the action on the resource.
    pub fn can(&self, action: &str, resource: &Expr) -> bool {
        self.policy_statements()
            .iter()
            .any(|statement| statement.covers(action, resource))
    }

    fn metric(&self, metric_name: &str) -> Metric {
        Metric {
            namespace: String::from("AWS/Lambda"),
            metric_name: metric_name.to_string(),
            dimensions: vec![(String::from("FunctionName"), self.name())],
            statistic: Statistic::Sum,
            period_seconds: 60,
        }
    }

    /// Failed invocations per minute.
    pub fn metric_errors(&self) -> Metric {
        self.metric("Errors")
    }

    /// Throttled invocations per minute.
    pub fn metric_throttles(&self) -> Metric {
        self.metric("Throttles")
    }
}

impl Construct for FunctionSpec {
    fn declare(&self, template: &mut Template) -> Result<()> {
        for layer in &self.layers {
            if let Layer::Asset {
                logical_id,
                description,
                code,
            } = layer
            {
                template.add(
                    logical_id,
                    Resource::new(
                        "AWS::Lambda::LayerVersion",
                        json!({
                            "Content": code.to_value(),
                            "CompatibleRuntimes": [self.runtime],
                            "Description": description,
                        }),
                    ),
                )?;
            }
        }

        let role_id = self.role_id();
        template.add(
            &role_id,
            Resource::new(
                "AWS::IAM::Role",
                json!({
                    "AssumeRolePolicyDocument": policy::assume_role_document("lambda.amazonaws.com"),
                    "ManagedPolicyArns": [Expr::sub(BASIC_EXECUTION_POLICY)],
                    "Policies": [{
                        "PolicyName": format!("{}Policy", self.logical_id),
                        "PolicyDocument": policy::document(&self.policy_statements()),
                    }],
                }),
            ),
        )?;

        let mut properties = json!({
            "FunctionName": self.function_name,
            "Handler": self.handler,
            "Runtime": self.runtime,
            "Code": self.code.to_value(),
            "Role": Expr::get_att(&role_id, "Arn"),
            "Timeout": self.timeout_seconds,
            "Layers": self.layers.iter().map(Layer::arn).collect::<Vec<_>>(),
            "Environment": { "Variables": self.environment },
        });
        if self.active_tracing {
            properties["TracingConfig"] = json!({ "Mode": "Active" });
        }
        template.add(
            &self.logical_id,
            Resource::new("AWS::Lambda::Function", properties).depends_on(role_id),
        )
    }
}
