use hyper::StatusCode;

/// Per-request error surface. These are the only errors the dispatcher
/// translates into an HTTP response; everything else is caught upstream
/// and logged before reaching here.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Request path did not match any service in the active route table.
    #[error("no route for path")]
    NoSuchRoute,
    /// Balancer has no live replica to offer.
    #[error("all replicas down")]
    AllReplicasDown,
    /// `connections >= max_connections` at admission time.
    #[error("admission rejected, proxy at capacity")]
    AdmissionRejected,
    /// Backend dial or transport failure while forwarding.
    #[error("backend proxy error: {0}")]
    BackendProxyError(#[from] hyper::Error),
}

impl DispatchError {
    /// Status written to the client for this error kind (spec.md §7).
    pub fn status_code(&self) -> StatusCode {
        match self {
            // The source classifies an unknown path as an internal error.
            // 404 is semantically correct but would be a deviation; see
            // DESIGN.md open question.
            Self::NoSuchRoute => StatusCode::INTERNAL_SERVER_ERROR,
            Self::AllReplicasDown => StatusCode::INTERNAL_SERVER_ERROR,
            Self::AdmissionRejected => StatusCode::SERVICE_UNAVAILABLE,
            Self::BackendProxyError(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Failure loading/parsing the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}
