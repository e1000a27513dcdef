//! Defines configuration as read from the environment.

use serde::Deserialize;
use std::path::PathBuf;

/// Default `max_recursion_depth` value.
fn default_max_recursion_depth() -> u32 {
    1000
}

/// Default `function_name` value.
fn default_function_name() -> String {
    String::from(crate::stack::DEFAULT_FUNCTION_NAME)
}

/// Default `stack_description` value.
fn default_stack_description() -> String {
    String::from("Recursive order ingestion triggered by store ingestion flags")
}

/// The ingestion function is configured entirely through environment
/// variables set by the stack.
#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    /// Table holding each shop's API token, keyed by the shop's host.
    pub api_secrets_table: String,

    /// Table holding one flag per shop with ingestion in progress. Its
    /// stream starts the ingestion.
    pub order_flags_table: String,

    /// Table of orders waiting to be fetched, with a `ShopUrl-index`
    /// global secondary index.
    pub order_process_table: String,

    /// Table receiving orders that couldn't be ingested.
    pub order_failed_table: String,

    /// How many orders are fetched per batch.
    pub batch_update_size: usize,

    /// Region of the tables.
    pub region_name: String,

    /// Topic receiving full orders.
    pub order_received_topic: String,

    /// Topic used to continue ingestion in a fresh invocation.
    pub recursive_processing_topic: String,

    /// How many continuations a single ingestion may chain before it
    /// is abandoned.
    #[serde(default = "default_max_recursion_depth")]
    pub max_recursion_depth: u32,
}

/// The template synthesizer is configured with the locations of the
/// uploaded bundles.
#[derive(Clone, Debug, Deserialize)]
pub struct StackSettings {
    /// Bucket holding the function bundle.
    pub code_bucket: String,

    /// Key of the function bundle.
    pub code_key: String,

    /// Bucket holding the dependency layer bundle.
    pub layer_bucket: String,

    /// Key of the dependency layer bundle.
    pub layer_key: String,

    #[serde(default = "default_function_name")]
    pub function_name: String,

    /// Overrides the instrumentation layer ARN. Defaults to the public
    /// collector layer in the deployment region.
    #[serde(default)]
    pub instrumentation_layer_arn: Option<String>,

    #[serde(default = "default_stack_description")]
    pub stack_description: String,

    /// Write the template here instead of standard output.
    #[serde(default)]
    pub synth_output: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::expr::Expr;
    use crate::stack::imports::Imports;
    use crate::stack::{OrderIngestionStack, StackProps};

    fn stack_settings() -> StackSettings {
        envy::from_iter([
            (String::from("CODE_BUCKET"), String::from("artifacts")),
            (String::from("CODE_KEY"), String::from("function.zip")),
            (String::from("LAYER_BUCKET"), String::from("artifacts")),
            (String::from("LAYER_KEY"), String::from("layer.zip")),
        ])
        .unwrap()
    }

    #[test]
    fn stack_environment_satisfies_handler_settings() {
        let stack = OrderIngestionStack::new(StackProps::from(&stack_settings())).unwrap();
        let env = stack.function.environment.iter().map(|(key, value)| {
            let resolved = match value {
                Expr::Literal(literal) => literal.clone(),
                _ => format!("resolved-{}", key.to_lowercase()),
            };
            (key.clone(), resolved)
        });
        let settings: Settings = envy::from_iter(env).unwrap();
        assert_eq!(settings.batch_update_size, 50);
        assert_eq!(settings.max_recursion_depth, 1000);
        assert_eq!(settings.order_failed_table, "resolved-order_failed_table");
    }

    #[test]
    fn handler_settings_require_every_key() {
        let partial = [
            (String::from("API_SECRETS_TABLE"), String::from("secrets")),
            (String::from("BATCH_UPDATE_SIZE"), String::from("50")),
        ];
        assert!(envy::from_iter::<_, Settings>(partial).is_err());
    }

    #[test]
    fn stack_settings_defaults() {
        let settings = stack_settings();
        assert_eq!(settings.function_name, "lambda-recursive-order-ingestion");
        assert!(settings.instrumentation_layer_arn.is_none());
        assert!(settings.synth_output.is_none());

        let props = StackProps::from(&settings);
        assert_eq!(props.code.key, "function.zip");
        assert_eq!(props.imports.export_names(), Imports::default().export_names());
    }
}
