//! Defines the synthesized template: the resources, outputs and
//! their rendering to CloudFormation JSON.

use crate::stack::expr::{is_pseudo_parameter, sub_variables, Expr};
use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// CloudFormation only accepts alphanumeric logical ids.
static LOGICAL_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new("^[A-Za-z0-9]{1,255}$").unwrap());

/// A single declared resource.
#[derive(Clone, Debug, Serialize)]
pub struct Resource {
    #[serde(rename = "Type")]
    pub kind: String,

    #[serde(rename = "Properties")]
    pub properties: Value,

    #[serde(rename = "DependsOn", skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl Resource {
    pub fn new(kind: impl Into<String>, properties: Value) -> Self {
        Resource {
            kind: kind.into(),
            properties,
            depends_on: Vec::new(),
        }
    }

    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        self.depends_on.push(logical_id.into());
        self
    }
}

/// The export part of an output.
#[derive(Clone, Debug, Serialize)]
pub struct Export {
    #[serde(rename = "Name")]
    pub name: String,
}

/// A stack output, optionally exported for cross-stack consumption.
#[derive(Clone, Debug, Serialize)]
pub struct Output {
    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "Value")]
    pub value: Expr,

    #[serde(rename = "Export", skip_serializing_if = "Option::is_none")]
    pub export: Option<Export>,
}

impl Output {
    pub fn exported(value: Expr, export_name: impl Into<String>) -> Self {
        Output {
            description: None,
            value,
            export: Some(Export {
                name: export_name.into(),
            }),
        }
    }
}

/// A full template.
#[derive(Clone, Debug, Serialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: &'static str,

    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, Resource>,

    #[serde(rename = "Outputs", skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

impl Template {
    pub fn new(description: Option<String>) -> Self {
        Template {
            format_version: "2010-09-09",
            description,
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Declare a resource under a fresh logical id.
    pub fn add(&mut self, logical_id: &str, resource: Resource) -> Result<()> {
        check_logical_id(logical_id)?;
        if self.resources.contains_key(logical_id) {
            bail!("logical id {:?} is declared twice", logical_id);
        }
        self.resources.insert(logical_id.to_string(), resource);
        Ok(())
    }

    /// Declare an output under a fresh logical id.
    pub fn add_output(&mut self, logical_id: &str, output: Output) -> Result<()> {
        check_logical_id(logical_id)?;
        if self.outputs.contains_key(logical_id) {
            bail!("output {:?} is declared twice", logical_id);
        }
        self.outputs.insert(logical_id.to_string(), output);
        Ok(())
    }

    /// Check that every reference in the template points to a declared
    /// resource.
    pub fn validate(&self) -> Result<()> {
        for (id, resource) in &self.resources {
            let mut referenced = BTreeSet::new();
            collect_references(&resource.properties, &mut referenced);
            referenced.extend(resource.depends_on.iter().cloned());
            for target in referenced {
                if !self.resources.contains_key(&target) {
                    return Err(anyhow!(
                        "resource {:?} references undeclared resource {:?}",
                        id,
                        target
                    ));
                }
            }
        }
        for (id, output) in &self.outputs {
            for target in output.value.referenced_ids() {
                if !self.resources.contains_key(&target) {
                    return Err(anyhow!(
                        "output {:?} references undeclared resource {:?}",
                        id,
                        target
                    ));
                }
            }
        }
        Ok(())
    }

    /// Render the template as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to render template")
    }

    /// Render the template into a file.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let rendered = self.to_json()?;
        std::fs::write(path, rendered)
            .with_context(|| format!("Failed to write template to {:?}", path))
    }
}

fn check_logical_id(logical_id: &str) -> Result<()> {
    if LOGICAL_ID_RE.is_match(logical_id) {
        Ok(())
    } else {
        Err(anyhow!("invalid logical id {:?}", logical_id))
    }
}

/// Walk rendered JSON looking for `Ref`, `Fn::GetAtt` and `Fn::Sub`
/// references to other resources.
fn collect_references(value: &Value, into: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(id)) = map.get("Ref") {
                    if !is_pseudo_parameter(id) {
                        into.insert(id.clone());
                    }
                    return;
                }
                if let Some(Value::Array(parts)) = map.get("Fn::GetAtt") {
                    if let Some(Value::String(id)) = parts.first() {
                        into.insert(id.clone());
                    }
                    return;
                }
                if let Some(Value::String(template)) = map.get("Fn::Sub") {
                    into.extend(sub_variables(template));
                    return;
                }
            }
            for nested in map.values() {
                collect_references(nested, into);
            }
        }
        Value::Array(items) => {
            for nested in items {
                collect_references(nested, into);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn topic() -> Resource {
        Resource::new("AWS::SNS::Topic", json!({}))
    }

    #[test]
    fn rejects_bad_and_duplicate_ids() {
        let mut template = Template::new(None);
        assert!(template.add("not-alphanumeric", topic()).is_err());
        template.add("Topic", topic()).unwrap();
        assert!(template.add("Topic", topic()).is_err());
    }

    #[test]
    fn validate_finds_dangling_references() {
        let mut template = Template::new(None);
        template
            .add(
                "Subscription",
                Resource::new(
                    "AWS::SNS::Subscription",
                    json!({ "TopicArn": { "Ref": "Topic" }, "Region": { "Ref": "AWS::Region" } }),
                ),
            )
            .unwrap();
        assert!(template.validate().is_err());
        template.add("Topic", topic()).unwrap();
        template.validate().unwrap();
    }

    #[test]
    fn validate_checks_outputs_and_depends_on() {
        let mut template = Template::new(None);
        template
            .add_output("Name", Output::exported(Expr::reference("Missing"), "name"))
            .unwrap();
        assert!(template.validate().is_err());

        let mut template = Template::new(None);
        template.add("Topic", topic().depends_on("Missing")).unwrap();
        assert!(template.validate().is_err());
    }

    #[test]
    fn renders_and_writes_json() {
        let mut template = Template::new(Some(String::from("demo")));
        template.add("Topic", topic()).unwrap();
        template
            .add_output("TopicArn", Output::exported(Expr::reference("Topic"), "topic-arn"))
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("template.json");
        template.write_to(&path).unwrap();
        let rendered: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(rendered["AWSTemplateFormatVersion"], "2010-09-09");
        assert_eq!(rendered["Resources"]["Topic"]["Type"], "AWS::SNS::Topic");
        assert!(rendered["Resources"]["Topic"].get("DependsOn").is_none());
        assert_eq!(rendered["Outputs"]["TopicArn"]["Export"]["Name"], "topic-arn");
    }
}
