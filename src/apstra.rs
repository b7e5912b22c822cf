pub mod client;
pub mod error;
pub mod graph;
pub mod mutex;
pub mod token;

pub use client::{ApstraClient, QueryResponse};
pub use error::ApstraError;
pub use graph::{MatchQuery, PathQuery, QEAttribute, QEValue, Query};
pub use mutex::BlueprintMutexes;
pub use token::ApiToken;
