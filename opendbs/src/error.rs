use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpenDbsError {
    #[error("Database '{0}' not found")]
    DatabaseNotFound(String),

    #[error("Rack '{rack}' not found in database '{database}'")]
    RackNotFound { database: String, rack: String },

    #[error("Schema validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),

    #[error("Rack '{rack}' is of type SQL and cannot accept NoSQL operations")]
    TypeMismatch { rack: String },

    #[error("Rack '{rack}' has no document ids left to assign")]
    IdsExhausted { rack: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Integrity check failed: stored hash {stored} does not match computed {computed}")]
    Corruption { stored: String, computed: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid name: '{0}'")]
    InvalidName(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("MessagePack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
}

impl OpenDbsError {
    /// True for the missing-database and missing-rack variants.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            OpenDbsError::DatabaseNotFound(_) | OpenDbsError::RackNotFound { .. }
        )
    }

    pub(crate) fn rack_not_found(database: &str, rack: &str) -> Self {
        OpenDbsError::RackNotFound {
            database: database.to_string(),
            rack: rack.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OpenDbsError>;
