//! Declares the order ingestion deployment unit: the function, the
//! trigger on the flags table's change stream, the recursive topic
//! subscription and the alarms, wired to topics and tables exported by
//! other stacks.

pub mod alarm;
pub mod expr;
pub mod function;
pub mod imports;
pub mod mapping;
pub mod policy;
pub mod subscription;
pub mod template;

use crate::conf::StackSettings;
use alarm::AlarmSpec;
use anyhow::{Context, Result};
use expr::Expr;
use function::{Code, FunctionSpec, Layer};
use imports::Imports;
use mapping::{EventMapping, StartingPosition};
use policy::PolicyStatement;
use subscription::TopicSubscription;
use template::{Output, Template};
use tracing::{info, instrument};

/// Name of the export other stacks use to find the function.
pub const FUNCTION_NAME_EXPORT: &str = "lambda-recursive-order-ingestion-function-name";

/// Default physical name of the function.
pub const DEFAULT_FUNCTION_NAME: &str = "lambda-recursive-order-ingestion";

/// Orders fetched per batch, as handed to the function.
pub const BATCH_UPDATE_SIZE: &str = "50";

/// Public collector layer published by AWS Distro for OpenTelemetry.
pub const DEFAULT_INSTRUMENTATION_LAYER_ARN: &str =
    "arn:aws:lambda:${AWS::Region}:901920570463:layer:aws-otel-collector-amd64-ver-0-90-1:1";

/// Something that adds resources to a template.
pub trait Construct {
    fn declare(&self, template: &mut Template) -> Result<()>;
}

/// Deploy-time inputs of the stack.
#[derive(Clone, Debug)]
pub struct StackProps {
    pub description: Option<String>,
    pub function_name: String,
    pub code: Code,
    pub dependency_layer: Code,
    pub instrumentation_layer_arn: Expr,
    pub imports: Imports,
}

impl From<&StackSettings> for StackProps {
    fn from(settings: &StackSettings) -> Self {
        StackProps {
            description: Some(settings.stack_description.clone()),
            function_name: settings.function_name.clone(),
            code: Code {
                bucket: settings.code_bucket.clone(),
                key: settings.code_key.clone(),
            },
            dependency_layer: Code {
                bucket: settings.layer_bucket.clone(),
                key: settings.layer_key.clone(),
            },
            instrumentation_layer_arn: settings
                .instrumentation_layer_arn
                .as_ref()
                .map(Expr::literal)
                .unwrap_or_else(|| Expr::sub(DEFAULT_INSTRUMENTATION_LAYER_ARN)),
            imports: Imports::default(),
        }
    }
}

/// The whole deployment unit, before rendering.
#[derive(Clone, Debug)]
pub struct OrderIngestionStack {
    pub description: Option<String>,
    pub imports: Imports,
    pub function: FunctionSpec,
    pub mapping: EventMapping,
    pub subscription: TopicSubscription,
    pub alarms: Vec<AlarmSpec>,
}

impl OrderIngestionStack {
    pub fn new(props: StackProps) -> Result<Self> {
        let imports = props.imports;

        let mut function = FunctionSpec::new(
            "RecursiveOrderIngestionFunction",
            props.function_name,
            props.code,
        );
        function
            .set_env("API_SECRETS_TABLE", imports.credentials_table.name())
            .set_env("ORDER_FLAGS_TABLE", imports.flags_table.name())
            .set_env("ORDER_PROCESS_TABLE", imports.processing_table.name())
            .set_env("ORDER_FAILED_TABLE", imports.failed_table.name())
            .set_env("BATCH_UPDATE_SIZE", BATCH_UPDATE_SIZE)
            .set_env("REGION_NAME", Expr::region())
            .set_env("ORDER_RECEIVED_TOPIC", imports.order_received_topic.arn())
            .set_env(
                "RECURSIVE_PROCESSING_TOPIC",
                imports.order_recursive_topic.arn(),
            )
            .add_layer(Layer::Asset {
                logical_id: String::from("RecursiveOrderIngestionLayer"),
                description: String::from("Dependency bundle of the recursive order ingestion"),
                code: props.dependency_layer,
            })
            .add_layer(Layer::Arn(props.instrumentation_layer_arn))
            .add_to_role_policy(PolicyStatement::allow(
                ["dynamodb:*"],
                [Expr::sub(
                    "arn:aws:dynamodb:${AWS::Region}:${AWS::AccountId}:table/*",
                )],
            ))
            .attach_topics(&[&imports.order_received_topic, &imports.order_recursive_topic]);
        function.permissions = ["secretsmanager:*", "dynamodb:*", "sns:*", "xray:*"]
            .into_iter()
            .map(String::from)
            .collect();

        let mapping = EventMapping {
            logical_id: String::from("StoreOrderDataIngestionFlagsTableMapping"),
            source_arn: imports
                .flags_table
                .stream_arn()
                .context("the flags table must export its stream")?,
            function_name: function.name(),
            starting_position: StartingPosition::TrimHorizon,
            batch_size: 1,
            batching_window_seconds: 1,
            filters: vec![mapping::insert_only()],
        };

        let subscription = TopicSubscription {
            logical_id: String::from("OrderRecursiveEventSubscription"),
            topic_arn: imports.order_recursive_topic.arn(),
            function_arn: function.arn(),
        };

        let alarms = vec![
            function
                .metric_errors()
                .create_alarm("RecursiveOrderIngestionErrorsAlarm", 1.0)
                .description(
                    "Alarm if the SUM of Lambda errors is greater than or equal to the \
                     threshold (1) for 1 evaluation period",
                )
                .add_alarm_action(imports.error_topic.arn()),
            function
                .metric_throttles()
                .create_alarm("RecursiveOrderIngestionThrottlesAlarm", 1.0)
                .description(
                    "Alarm if the SUM of Lambda throttles is greater than or equal to the \
                     threshold (1) for 1 evaluation period",
                )
                .add_alarm_action(imports.error_topic.arn()),
        ];

        Ok(OrderIngestionStack {
            description: props.description,
            imports,
            function,
            mapping,
            subscription,
            alarms,
        })
    }

    /// Render every construct into a validated template.
    #[instrument(skip(self), fields(function_name = %self.function.function_name))]
    pub fn synth(&self) -> Result<Template> {
        let mut template = Template::new(self.description.clone());
        let mut constructs: Vec<&dyn Construct> =
            vec![&self.function, &self.mapping, &self.subscription];
        constructs.extend(self.alarms.iter().map(|alarm| alarm as &dyn Construct));
        for construct in constructs {
            construct.declare(&mut template)?;
        }
        template.add_output(
            "FunctionName",
            Output::exported(self.function.name(), FUNCTION_NAME_EXPORT),
        )?;
        template.validate().context("Synthesized template is inconsistent")?;
        info!(
            resources = template.resources.len(),
            outputs = template.outputs.len(),
            "Synthesized template"
        );
        Ok(template)
    }
}
