use errors::{
    log_error_metadata,
    ErrorMetadata,
    ErrorMetadataAnyhowExt,
};

/// Return `Result<(), MainError>` from `main` functions so returned errors
/// are reported through the standard path before the process exits.
pub struct MainError(anyhow::Error);

impl<T: Into<anyhow::Error>> From<T> for MainError {
    fn from(e: T) -> Self {
        let mut err: anyhow::Error = e.into();
        report_error_sync(&mut err);
        Self(err)
    }
}

impl std::fmt::Debug for MainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Just print the `Display` of the error rather than `Debug`, as
        // `report_error_sync` above already logged the details.
        write!(f, "{}", self.0)
    }
}

/// Log an error at the boundary of a worker loop or the HTTP layer.
///
/// Deterministic user errors log at `warn` (they are the caller's fault and
/// arrive in bulk); everything else logs at `error`. Tagged errors also
/// bump the per-code counter.
pub fn report_error_sync(err: &mut anyhow::Error) {
    if let Some(metadata) = err.downcast_ref::<ErrorMetadata>() {
        log_error_metadata(metadata);
    }
    if err.is_deterministic_user_error() {
        tracing::warn!("Caught developer error: {err:#}");
    } else {
        tracing::error!("Caught error: {err:#}");
    }
}

pub async fn report_error(err: &mut anyhow::Error) {
    // Yield in case this is during shutdown - at which point, errors being
    // reported explicitly aren't useful. Yielding allows tokio to complete a
    // cancellation.
    tokio::task::yield_now().await;
    report_error_sync(err);
}
