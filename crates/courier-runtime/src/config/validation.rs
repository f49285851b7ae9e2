//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{CourierConfig, LogLevel, LogOutput, LoggingConfig, RoutingConfig};
use courier_core::ProcessingOptions;
use std::collections::HashMap;

/// Validates the entire configuration.
pub fn validate_config(config: &CourierConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_routing_config(&config.routing)?;
    validate_processing_config(&config.processing)?;
    Ok(())
}

/// Validates logging settings.
fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    for (module, level) in &logging.filters {
        if level.parse::<LogLevel>().is_err() {
            return Err(ConfigError::validation(format!(
                "Invalid log level '{level}' for '{module}'. Valid values are: trace, debug, info, warn, error"
            )));
        }
    }

    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    Ok(())
}

/// Validates named endpoints and the convention resolver.
fn validate_routing_config(routing: &RoutingConfig) -> ConfigResult<()> {
    for (name, endpoint) in &routing.endpoints {
        if endpoint.transport_id.is_empty() {
            return Err(ConfigError::invalid_endpoint(name, "transport id is empty"));
        }
        if endpoint.destination.publish.is_empty() && endpoint.destination.subscribe.is_empty() {
            return Err(ConfigError::invalid_endpoint(name, "destination is empty"));
        }
    }

    if let super::schema::ResolverConfig::Convention(options) = &routing.resolver {
        if options.transport.is_empty() {
            return Err(ConfigError::missing_field("routing.resolver.transport"));
        }
    }

    Ok(())
}

/// Validates per-route worker settings.
fn validate_processing_config(processing: &HashMap<String, ProcessingOptions>) -> ConfigResult<()> {
    for (route, options) in processing {
        if options.thread_count == 0 {
            return Err(ConfigError::validation(format!(
                "Route '{route}' needs at least one processing thread"
            )));
        }
        if options.queue_capacity == 0 {
            return Err(ConfigError::validation(format!(
                "Route '{route}' needs a queue capacity greater than 0"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use courier_core::{Destination, Endpoint, SerializationFormat};

    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = CourierConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_invalid_filter_level() {
        let mut config = CourierConfig::default();
        config
            .logging
            .filters
            .insert("courier_core".to_string(), "loud".to_string());
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_validate_empty_endpoint() {
        let mut config = CourierConfig::default();
        config.routing.endpoints.insert(
            "orders".to_string(),
            Endpoint::new("", Destination::new("orders"), true, SerializationFormat::Json),
        );
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn test_validate_zero_threads() {
        let mut config = CourierConfig::default();
        config.processing.insert(
            "commands".to_string(),
            ProcessingOptions {
                thread_count: 0,
                queue_capacity: 16,
            },
        );
        assert!(validate_config(&config).is_err());
    }
}
