pub mod codec;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod index;
pub mod query;
pub mod schema;
pub mod search;
pub mod validation;

pub use config::EngineConfig;
pub use document::Document;
pub use engine::Engine;
pub use error::{OpenDbsError, Result};
pub use query::Predicate;
pub use schema::{RackKind, RackSchema};
