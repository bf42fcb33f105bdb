pub mod bigquery_client;
pub mod completion_client;

pub use bigquery_client::{BigQueryClient, JobHandle, QueryConstraints, QueryExecutor};
pub use completion_client::{
    ChatMessage, CompletionClient, CompletionRequest, OpenRouterClient, RequestyClient, Role,
};
