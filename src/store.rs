//! Defines access to the tables the function reads and writes: pending
//! orders, ingestion flags, shop credentials and failed orders.

use crate::propagation::{TraceContext, TRACE_FIELD};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use std::collections::HashMap;
use tracing::{info, instrument, warn};

/// Index of the processing table partitioned by shop.
const SHOP_URL_INDEX: &str = "ShopUrl-index";

/// An order waiting to be fetched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingOrder {
    pub order_id: String,

    /// Trace context left by the producer that queued the order.
    pub upstream: Option<TraceContext>,
}

/// Storage operations used by the ingestion loop.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Up to `limit` orders waiting to be fetched for the shop.
    async fn pending_orders(&self, shop_url: &str, limit: usize) -> Result<Vec<PendingOrder>>;

    /// Remove fetched orders from the processing table.
    async fn delete_orders(&self, order_ids: &[String]) -> Result<()>;

    /// Remove the shop's ingestion flag.
    async fn delete_shop_flag(&self, shop_url: &str) -> Result<()>;

    /// The shop's API token, if one is stored.
    async fn shop_token(&self, shop_url: &str) -> Result<Option<String>>;

    /// Keep a record of an order that couldn't be ingested.
    async fn record_failed(&self, shop_url: &str, order_id: &str, reason: &str) -> Result<()>;
}

/// Names of the tables involved.
#[derive(Clone, Debug)]
pub struct Tables {
    pub secrets: String,
    pub flags: String,
    pub process: String,
    pub failed: String,
}

/// Credentials are keyed by the shop's host, without scheme.
pub fn credentials_key(shop_url: &str) -> &str {
    shop_url.rsplit("://").next().unwrap_or(shop_url)
}

/// The trace context stored on a pending order item, a map of string
/// `traceId` and `spanId` attributes.
fn upstream_context(item: &HashMap<String, AttributeValue>) -> Option<TraceContext> {
    let fields = item.get(TRACE_FIELD)?.as_m().ok()?;
    let field = |name: &str| fields.get(name).and_then(|value| value.as_s().ok()).cloned();
    Some(TraceContext {
        trace_id: field("traceId")?,
        span_id: field("spanId")?,
    })
}

/// DynamoDB-backed store.
pub struct DynamoStore {
    client: Client,
    tables: Tables,
}

impl DynamoStore {
    pub fn new(client: Client, tables: Tables) -> Self {
        DynamoStore { client, tables }
    }
}

#[async_trait]
impl OrderStore for DynamoStore {
    #[instrument(skip(self))]
    async fn pending_orders(&self, shop_url: &str, limit: usize) -> Result<Vec<PendingOrder>> {
        let response = self
            .client
            .query()
            .table_name(&self.tables.process)
            .index_name(SHOP_URL_INDEX)
            .key_condition_expression("shop_url = :shop_url")
            .expression_attribute_values(":shop_url", AttributeValue::S(shop_url.to_string()))
            .limit(i32::try_from(limit).unwrap_or(i32::MAX))
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to query pending orders of shop {:?} in table {:?}",
                    shop_url, self.tables.process
                )
            })?;
        let mut orders = Vec::new();
        for item in response.items().unwrap_or_default() {
            let order_id = item
                .get("order_id")
                .and_then(|value| value.as_s().ok())
                .ok_or_else(|| {
                    anyhow!(
                        "pending order of shop {:?} has no string order_id: {:?}",
                        shop_url,
                        item
                    )
                })?;
            orders.push(PendingOrder {
                order_id: order_id.clone(),
                upstream: upstream_context(item),
            });
        }
        info!(count = orders.len(), "Pending orders returned");
        Ok(orders)
    }

    #[instrument(skip(self))]
    async fn delete_orders(&self, order_ids: &[String]) -> Result<()> {
        for order_id in order_ids {
            self.client
                .delete_item()
                .table_name(&self.tables.process)
                .key("order_id", AttributeValue::S(order_id.clone()))
                .send()
                .await
                .with_context(|| {
                    format!(
                        "Failed to delete order {:?} from table {:?}",
                        order_id, self.tables.process
                    )
                })?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_shop_flag(&self, shop_url: &str) -> Result<()> {
        self.client
            .delete_item()
            .table_name(&self.tables.flags)
            .key("shop_url", AttributeValue::S(shop_url.to_string()))
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to delete flag of shop {:?} from table {:?}",
                    shop_url, self.tables.flags
                )
            })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn shop_token(&self, shop_url: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get_item()
            .table_name(&self.tables.secrets)
            .key("id", AttributeValue::S(credentials_key(shop_url).to_string()))
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to read credentials of shop {:?} from table {:?}",
                    shop_url, self.tables.secrets
                )
            })?;
        let token = response
            .item()
            .and_then(|item| item.get("shopSecretKey"))
            .and_then(|value| value.as_s().ok())
            .cloned();
        if token.is_none() {
            warn!("No credentials stored for shop");
        }
        Ok(token)
    }

    #[instrument(skip(self))]
    async fn record_failed(&self, shop_url: &str, order_id: &str, reason: &str) -> Result<()> {
        self.client
            .put_item()
            .table_name(&self.tables.failed)
            .item("order_id", AttributeValue::S(order_id.to_string()))
            .item("shop_url", AttributeValue::S(shop_url.to_string()))
            .item("reason", AttributeValue::S(reason.to_string()))
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to record failed order {:?} in table {:?}",
                    order_id, self.tables.failed
                )
            })?;
        Ok(())
    }
}
