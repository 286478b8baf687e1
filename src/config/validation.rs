use crate::config::types::{
    CircuitConfig, Config, HarvestConfig, OutputConfig, TorConfig, UserAgentConfig,
};
use crate::ConfigError;
use url::Url;

/// Proxy schemes a circuit may use
const PROXY_SCHEMES: &[&str] = &["socks5", "socks5h", "http", "https"];

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_harvest_config(&config.harvest)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_tor_config(&config.tor)?;
    validate_circuits(&config.circuits)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates harvest configuration
fn validate_harvest_config(config: &HarvestConfig) -> Result<(), ConfigError> {
    if !config.sitemap_url.contains('#') {
        return Err(ConfigError::Validation(format!(
            "sitemap_url must contain a '#' page placeholder, got '{}'",
            config.sitemap_url
        )));
    }

    Url::parse(&config.sitemap_url.replace('#', "1"))
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid sitemap_url: {}", e)))?;

    if config.threads_per_shard < 1 || config.threads_per_shard > 16 {
        return Err(ConfigError::Validation(format!(
            "threads_per_shard must be between 1 and 16, got {}",
            config.threads_per_shard
        )));
    }

    if config.reviews_per_page < 1 {
        return Err(ConfigError::Validation(
            "reviews_per_page must be >= 1".to_string(),
        ));
    }

    if config.request_timeout < 1 || config.connect_timeout < 1 {
        return Err(ConfigError::Validation(
            "request_timeout and connect_timeout must be >= 1s".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates control port settings
fn validate_tor_config(config: &TorConfig) -> Result<(), ConfigError> {
    if let Some(address) = &config.control_address {
        validate_socket_address(address)?;
    }

    if config.control_password.is_some() && config.control_address.is_none() {
        return Err(ConfigError::Validation(
            "control_password is set but control_address is missing".to_string(),
        ));
    }

    Ok(())
}

/// Validates circuit entries
fn validate_circuits(circuits: &[CircuitConfig]) -> Result<(), ConfigError> {
    if circuits.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[circuit]] entry is required".to_string(),
        ));
    }

    for (index, circuit) in circuits.iter().enumerate() {
        if let Some(proxy) = &circuit.proxy {
            let url = Url::parse(proxy).map_err(|e| {
                ConfigError::InvalidUrl(format!("Invalid proxy for circuit {}: {}", index, e))
            })?;

            if !PROXY_SCHEMES.contains(&url.scheme()) {
                return Err(ConfigError::Validation(format!(
                    "circuit {} proxy must use one of {:?}, got '{}'",
                    index,
                    PROXY_SCHEMES,
                    url.scheme()
                )));
            }
        }

        if let Some(address) = &circuit.control_address {
            validate_socket_address(address)?;
        }
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Checks a `host:port` pair
fn validate_socket_address(address: &str) -> Result<(), ConfigError> {
    let (host, port) = address.rsplit_once(':').ok_or_else(|| {
        ConfigError::Validation(format!("control address '{}' must be host:port", address))
    })?;

    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(ConfigError::Validation(format!(
            "control address '{}' must be host:port",
            address
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !parts[1].contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
