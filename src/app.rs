//! Defines the read-only application state and the ingestion loop run
//! for each trigger.

use crate::conf::Settings;
use crate::notify::{self, Continuation, Notifier};
use crate::propagation::TraceContext;
use crate::shopify::OrderSource;
use crate::stack::mapping::{insert_only, FilterPattern};
use crate::store::{OrderStore, PendingOrder};
use crate::trigger::Trigger;
use anyhow::{anyhow, bail, Result};
use envy::from_env;
use once_cell::sync::OnceCell;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::{error, info, instrument, warn};

/// Reason recorded for orders the shop no longer returns.
pub const NOT_FOUND_REASON: &str = "not found in shop API, possibly archived";

/// The backends the ingestion loop talks to.
pub struct Services {
    pub store: Box<dyn OrderStore>,
    pub source: Box<dyn OrderSource>,
    pub notifier: Box<dyn Notifier>,
}

/// How a round of ingestion ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The shop has no pending orders left and its flag was removed.
    Finished,

    /// A continuation with the given depth was published.
    Continued { depth: u32 },
}

/// Raised when a shop would chain more continuations than allowed. The
/// shop's flag is kept so the ingestion can be resumed by hand.
#[derive(Debug)]
pub struct RecursionLimit {
    pub shop_url: String,
    pub depth: u32,
}

impl fmt::Display for RecursionLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "shop {:?} still has pending orders after {} continuations",
            self.shop_url, self.depth
        )
    }
}

impl std::error::Error for RecursionLimit {}

/// An App is an initialized application state, derived from
/// settings.
pub struct App {
    /// The original settings.
    pub settings: Settings,

    /// The filter change records must pass, same as the one on the
    /// event source mapping.
    pub filter: FilterPattern,
}

impl App {
    /// Initialize an App instance given a settings struct. Consumes
    /// the settings struct.
    pub fn new(settings: Settings) -> Result<Self> {
        if settings.batch_update_size == 0 {
            bail!("BATCH_UPDATE_SIZE must be positive");
        }
        Ok(App {
            settings,
            filter: insert_only(),
        })
    }

    /// Decode the triggers of an invocation payload.
    pub fn triggers(&self, payload: &Value) -> Result<Vec<Trigger>> {
        Trigger::from_payload(payload, &self.filter)
    }

    /// Run one round of ingestion for the trigger's shop: ingest one
    /// batch, then either close the shop's ingestion or leave a
    /// continuation for the rest. `invocation` is the trace context of
    /// the running invocation, used for orders queued without one.
    #[instrument(skip(self, invocation, services), fields(shop_url = %trigger.shop_url, depth = trigger.depth))]
    pub async fn handle(
        &self,
        trigger: &Trigger,
        invocation: Option<&TraceContext>,
        services: &Services,
    ) -> Result<Outcome> {
        let shop_url = trigger.shop_url.as_str();
        let ingested = self.ingest_batch(shop_url, invocation, services).await?;
        info!(ingested, "Ingested batch");

        if services.store.pending_orders(shop_url, 1).await?.is_empty() {
            info!("No pending orders left; stopping ingestion");
            services.store.delete_shop_flag(shop_url).await?;
            // Orders queued between the check and the deletion would
            // otherwise wait for the next flag.
            let late = self.ingest_batch(shop_url, invocation, services).await?;
            info!(late, "Deleted ingestion flag");
            return Ok(Outcome::Finished);
        }

        let depth = trigger.depth.saturating_add(1);
        if depth > self.settings.max_recursion_depth {
            let limit = RecursionLimit {
                shop_url: shop_url.to_string(),
                depth: trigger.depth,
            };
            error!(%limit, "Abandoning ingestion");
            return Err(limit.into());
        }
        let continuation = Continuation {
            shop_url: shop_url.to_string(),
            depth,
        };
        services
            .notifier
            .publish(
                &self.settings.recursive_processing_topic,
                &serde_json::to_value(&continuation)?,
            )
            .await?;
        info!(depth, "Continuing ingestion");
        Ok(Outcome::Continued { depth })
    }

    /// Fetch one batch of pending orders, publish the ones found and
    /// drop the batch from the processing table. Returns how many
    /// pending orders the batch held.
    async fn ingest_batch(
        &self,
        shop_url: &str,
        invocation: Option<&TraceContext>,
        services: &Services,
    ) -> Result<usize> {
        let limit = self.settings.batch_update_size;
        let pending = services.store.pending_orders(shop_url, limit).await?;
        if pending.is_empty() {
            return Ok(0);
        }
        let token = services
            .store
            .shop_token(shop_url)
            .await?
            .ok_or_else(|| anyhow!("no credentials stored for shop {:?}", shop_url))?;
        let order_ids: Vec<String> = pending.iter().map(|o| o.order_id.clone()).collect();

        let mut fetched: HashMap<String, Value> = services
            .source
            .fetch_orders(shop_url, &token, &order_ids)
            .await?
            .into_iter()
            .filter_map(|order| order_key(&order).map(|key| (key, order)))
            .collect();

        for order in &pending {
            let full_order = fetched.remove(&order.order_id);
            self.ingest_order(shop_url, order, full_order, invocation, services)
                .await?;
        }

        services.store.delete_orders(&order_ids).await?;
        Ok(pending.len())
    }

    /// Publish one fetched order, or record it as failed when the shop
    /// didn't return it. The message continues the order's upstream
    /// trace when it has one, and the invocation's otherwise.
    #[instrument(skip_all, fields(order_id = %order.order_id))]
    async fn ingest_order(
        &self,
        shop_url: &str,
        order: &PendingOrder,
        full_order: Option<Value>,
        invocation: Option<&TraceContext>,
        services: &Services,
    ) -> Result<()> {
        let trace = match &order.upstream {
            Some(upstream) => {
                info!(trace_id = %upstream.trace_id, "Continuing upstream trace");
                Some(upstream)
            }
            None => invocation,
        };
        match full_order {
            Some(full_order) => {
                services
                    .notifier
                    .publish(
                        &self.settings.order_received_topic,
                        &notify::order_received(
                            shop_url,
                            self.settings.batch_update_size,
                            full_order,
                            trace,
                        ),
                    )
                    .await
            }
            None => {
                warn!("Order not returned by the shop");
                services
                    .store
                    .record_failed(shop_url, &order.order_id, NOT_FOUND_REASON)
                    .await
            }
        }
    }
}

/// The id of a fetched order, as stored in the processing table.
fn order_key(order: &Value) -> Option<String> {
    match order.get("id")? {
        Value::Number(id) => Some(id.to_string()),
        Value::String(id) => Some(id.clone()),
        _ => None,
    }
}

/// Global App instance.
static CURRENT: OnceCell<App> = OnceCell::new();

/// Initialize the global App instance.
pub fn init() -> Result<()> {
    let settings = from_env()?;
    let app = App::new(settings)?;
    CURRENT
        .set(app)
        .map_err(|_| anyhow!("app::CURRENT was already initialized"))
}

/// Get the current App instance, or panic if it hasn't been
/// initialized.
pub fn current() -> &'static App {
    CURRENT.get().expect("app is not initialized")
}
