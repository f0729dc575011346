//! Structured logging setup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Environment, LogFormat};

/// Filter used when `RUST_LOG` is not set.
pub fn default_filter(environment: &Environment) -> &'static str {
    if environment.is_production() {
        "idcard_api=info,tower_http=info"
    } else {
        "idcard_api=debug,tower_http=debug"
    }
}

/// Resolve `Auto` against the environment.
pub fn effective_format(format: LogFormat, environment: &Environment) -> LogFormat {
    match format {
        LogFormat::Auto if environment.is_production() => LogFormat::Json,
        LogFormat::Auto => LogFormat::Pretty,
        other => other,
    }
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init(format: LogFormat, environment: &Environment) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(environment).into());

    let registry = tracing_subscriber::registry().with(filter);
    let result = match effective_format(format, environment) {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
        _ => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_defaults_to_json() {
        assert_eq!(effective_format(LogFormat::Auto, &Environment::Production), LogFormat::Json);
        assert_eq!(effective_format(LogFormat::Auto, &Environment::Development), LogFormat::Pretty);
        assert_eq!(effective_format(LogFormat::Pretty, &Environment::Production), LogFormat::Pretty);
    }
}
