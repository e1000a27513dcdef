pub mod app;
pub mod client;
pub mod conf;
pub mod notify;
pub mod propagation;
pub mod shopify;
pub mod stack;
pub mod store;
pub mod trigger;
