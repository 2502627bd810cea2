use thiserror::Error;

#[derive(Debug, Error)]
pub enum OptionFlowError {
    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Definition errors
    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    // Connector / HTTP errors
    #[error("Connector \"{0}\" not found")]
    ConnectorNotFound(String),

    #[error("Invalid URL for connector \"{connector}\": {message}")]
    InvalidUrl { connector: String, message: String },

    #[error("Host \"{host}\" is not allowed for connector \"{connector}\"")]
    HostNotAllowed { connector: String, host: String },

    #[error("Secret \"{0}\" could not be resolved")]
    SecretUnresolved(String),

    #[error("HTTP request failed: {0}")]
    HttpRequest(String),

    #[error("HTTP {status} from connector \"{connector}\"")]
    HttpStatus { connector: String, status: u16 },

    #[error("HTTP request timed out after {0}ms")]
    HttpTimeout(u64),

    #[error("Response exceeded {limit} bytes")]
    ResponseTooLarge { limit: usize },

    #[error("Response is not valid JSON: {0}")]
    ResponseNotJson(String),

    // Collaborator errors
    #[error("AI extraction failed: {0}")]
    Extractor(String),

    #[error("Remote resolver failed: {0}")]
    Remote(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, OptionFlowError>;
