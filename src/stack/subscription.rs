//! Defines a topic subscription that invokes the function.

use crate::stack::expr::Expr;
use crate::stack::template::{Resource, Template};
use crate::stack::Construct;
use anyhow::Result;
use serde_json::json;

/// Subscribes a function to a topic and allows the topic to invoke
/// it.
#[derive(Clone, Debug)]
pub struct TopicSubscription {
    pub logical_id: String,
    pub topic_arn: Expr,
    pub function_arn: Expr,
}

impl TopicSubscription {
    pub fn permission_id(&self) -> String {
        format!("{}Permission", self.logical_id)
    }
}

impl Construct for TopicSubscription {
    fn declare(&self, template: &mut Template) -> Result<()> {
        let permission_id = self.permission_id();
        template.add(
            &permission_id,
            Resource::new(
                "AWS::Lambda::Permission",
                json!({
                    "Action": "lambda:InvokeFunction",
                    "FunctionName": self.function_arn,
                    "Principal": "sns.amazonaws.com",
                    "SourceArn": self.topic_arn,
                }),
            ),
        )?;
        template.add(
            &self.logical_id,
            Resource::new(
                "AWS::SNS::Subscription",
                json!({
                    "Protocol": "lambda",
                    "TopicArn": self.topic_arn,
                    "Endpoint": self.function_arn,
                }),
            )
            .depends_on(permission_id),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declares_subscription_and_invoke_permission() {
        let subscription = TopicSubscription {
            logical_id: String::from("Recursive"),
            topic_arn: Expr::import("recursive-topic"),
            function_arn: Expr::get_att("Fn", "Arn"),
        };
        let mut template = Template::new(None);
        subscription.declare(&mut template).unwrap();

        let subscription = &template.resources["Recursive"];
        assert_eq!(subscription.kind, "AWS::SNS::Subscription");
        assert_eq!(subscription.properties["Protocol"], "lambda");
        assert_eq!(subscription.depends_on, vec!["RecursivePermission"]);

        let permission = &template.resources["RecursivePermission"];
        assert_eq!(permission.properties["Principal"], "sns.amazonaws.com");
        assert_eq!(
            permission.properties["SourceArn"],
            json!({ "Fn::ImportValue": "recursive-topic" })
        );
    }
}
