use anyhow::{Context, Result};
use envy::from_env;
use recursive_order_ingestion::conf::StackSettings;
use recursive_order_ingestion::stack::{OrderIngestionStack, StackProps};
use tracing::info;

/// Render the order ingestion stack as a CloudFormation template, to
/// standard output or to `SYNTH_OUTPUT`.
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
    let settings: StackSettings = from_env().context("Invalid stack settings")?;
    let template = OrderIngestionStack::new(StackProps::from(&settings))?.synth()?;

    match &settings.synth_output {
        Some(path) => {
            template.write_to(path)?;
            info!(?path, "Wrote template");
        }
        None => println!("{}", template.to_json()?),
    }
    Ok(())
}
