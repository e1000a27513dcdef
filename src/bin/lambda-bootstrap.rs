use anyhow::{anyhow, Context, Result};
use lambda_runtime::{run, service_fn, LambdaEvent};
use recursive_order_ingestion::propagation::TraceContext;
use recursive_order_ingestion::{app, client};
use serde_json::Value;
use tracing::info;

/// Run one round of ingestion for each shop named by the invocation's
/// change records and continuations.
async fn function_handler(event: LambdaEvent<Value>) -> Result<()> {
    let triggers = app::current().triggers(&event.payload)?;
    let invocation = event
        .context
        .xray_trace_id
        .as_deref()
        .and_then(TraceContext::from_xray_header);
    info!(triggers = triggers.len(), traced = invocation.is_some(), "Processing invocation");
    for trigger in triggers {
        let outcome = app::current()
            .handle(&trigger, invocation.as_ref(), client::current())
            .await
            .with_context(|| format!("Failed to handle trigger {:?}", &trigger))?;
        info!(shop_url = %trigger.shop_url, ?outcome, "Handled trigger");
    }
    Ok(())
}

/// Run the AWS Lambda function that ingests a shop's pending orders
/// when its ingestion flag is inserted, continuing itself through the
/// recursive topic until no order is left.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();
    app::init()?;
    client::init(&app::current().settings).await?;

    run(service_fn(function_handler))
        .await
        .map_err(|e| anyhow!("{:?}", e))
}
