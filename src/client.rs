//! Defines the global service clients.

use crate::app::Services;
use crate::conf::Settings;
use crate::notify::SnsNotifier;
use crate::shopify::ShopifyClient;
use crate::store::{DynamoStore, Tables};
use anyhow::{anyhow, Context, Result};
use aws_config::from_env;
use aws_sdk_dynamodb::config::Region;
use once_cell::sync::OnceCell;
use std::env;

/// Load the shared AWS configuration for the tables' region. An
/// `AWS_ENDPOINT_URL` overrides every service endpoint.
async fn aws_service_config(settings: &Settings) -> aws_config::SdkConfig {
    let loader = from_env().region(Region::new(settings.region_name.clone()));
    if let Ok(endpoint_url) = env::var("AWS_ENDPOINT_URL") {
        loader
            .endpoint_url(
                if endpoint_url.starts_with("http://") || endpoint_url.starts_with("https://") {
                    endpoint_url
                } else {
                    format!("https://{}", endpoint_url)
                },
            )
            .load()
            .await
    } else {
        loader.load().await
    }
}

/// Global services instance.
static CURRENT: OnceCell<Services> = OnceCell::new();

/// Initialize the global services.
pub async fn init(settings: &Settings) -> Result<()> {
    let config = aws_service_config(settings).await;
    let tables = Tables {
        secrets: settings.api_secrets_table.clone(),
        flags: settings.order_flags_table.clone(),
        process: settings.order_process_table.clone(),
        failed: settings.order_failed_table.clone(),
    };
    let http = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;
    let services = Services {
        store: Box::new(DynamoStore::new(aws_sdk_dynamodb::Client::new(&config), tables)),
        source: Box::new(ShopifyClient::new(http)),
        notifier: Box::new(SnsNotifier::new(aws_sdk_sns::Client::new(&config))),
    };
    CURRENT
        .set(services)
        .map_err(|_| anyhow!("client::CURRENT was already initialized"))
}

/// Get the current services, or panic if they haven't been
/// initialized.
pub fn current() -> &'static Services {
    CURRENT.get().expect("client is not initialized")
}
