//! Defines references to topics and tables owned by other stacks. They
//! are resolved by export name at deploy time and never declared as
//! resources here.

use crate::stack::expr::Expr;

/// A topic exported by another stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportedTopic {
    pub export_name: String,
}

impl ImportedTopic {
    pub fn new(export_name: impl Into<String>) -> Self {
        ImportedTopic {
            export_name: export_name.into(),
        }
    }

    pub fn arn(&self) -> Expr {
        Expr::import(&self.export_name)
    }
}

/// A table exported by another stack. Only tables that feed a trigger
/// carry a stream export.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportedTable {
    pub name_export: String,
    pub stream_export: Option<String>,
}

impl ImportedTable {
    pub fn from_name(name_export: impl Into<String>) -> Self {
        ImportedTable {
            name_export: name_export.into(),
            stream_export: None,
        }
    }

    pub fn with_stream(name_export: impl Into<String>, stream_export: impl Into<String>) -> Self {
        ImportedTable {
            name_export: name_export.into(),
            stream_export: Some(stream_export.into()),
        }
    }

    pub fn name(&self) -> Expr {
        Expr::import(&self.name_export)
    }

    pub fn stream_arn(&self) -> Option<Expr> {
        self.stream_export.as_ref().map(Expr::import)
    }
}

/// Everything the order ingestion stack takes from its neighbours.
#[derive(Clone, Debug)]
pub struct Imports {
    /// Full orders are published here for downstream consumers.
    pub order_received_topic: ImportedTopic,

    /// Continuations of the ingestion loop.
    pub order_recursive_topic: ImportedTopic,

    /// Alarm notifications.
    pub error_topic: ImportedTopic,

    /// Per-shop ingestion flags; its stream triggers the function.
    pub flags_table: ImportedTable,

    /// Orders waiting to be fetched, indexed by shop.
    pub processing_table: ImportedTable,

    /// Shop API tokens.
    pub credentials_table: ImportedTable,

    /// Orders that couldn't be ingested.
    pub failed_table: ImportedTable,
}

impl Default for Imports {
    fn default() -> Self {
        Imports {
            order_received_topic: ImportedTopic::new("order-received-event-sns-topic-arn"),
            order_recursive_topic: ImportedTopic::new("order-recursive-event-sns-topic-arn"),
            error_topic: ImportedTopic::new("lambda-execution-error-event-sns-topic-arn"),
            flags_table: ImportedTable::with_stream(
                "store-order-data-ingestion-flags-dynamodb-table-arn",
                "store-order-data-ingestion-flags-dynamodb-table-stream-arn",
            ),
            processing_table: ImportedTable::from_name(
                "orders-ready-for-processing-dynamodb-table-arn",
            ),
            credentials_table: ImportedTable::from_name("store-credentials-simple-table-arn"),
            failed_table: ImportedTable::from_name("orders-failed-processing-dynamodb-table-arn"),
        }
    }
}

impl Imports {
    /// All export names this stack depends on.
    pub fn export_names(&self) -> Vec<&str> {
        let mut names = vec![
            self.order_received_topic.export_name.as_str(),
            self.order_recursive_topic.export_name.as_str(),
            self.error_topic.export_name.as_str(),
        ];
        for table in [
            &self.flags_table,
            &self.processing_table,
            &self.credentials_table,
            &self.failed_table,
        ] {
            names.push(table.name_export.as_str());
            if let Some(stream) = &table.stream_export {
                names.push(stream.as_str());
            }
        }
        names
    }
}
