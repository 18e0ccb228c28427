use std::sync::LazyLock;

use prometheus::Registry;

/// Process-wide registry all `register_logbull_*!` declarations land in.
pub static LOGBULL_METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);
