//! Checks shared by the configuration domains

use crate::error::{ConfigError, ConfigResult};

/// A configuration section that can check itself after loading
pub trait Validatable {
    fn validate(&self) -> ConfigResult<()>;

    /// Section name used in error messages
    fn domain_name(&self) -> &'static str;

    fn validation_error(&self, message: impl Into<String>) -> ConfigError {
        domain_error(self.domain_name(), message)
    }
}

fn domain_error(domain: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::DomainError {
        domain: domain.to_string(),
        message: message.into(),
    }
}

pub fn validate_required_string(value: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    match value.trim() {
        "" => Err(domain_error(domain, format!("{} cannot be empty", field_name))),
        _ => Ok(()),
    }
}

/// Rejects zero and anything below it
pub fn validate_positive<T>(value: T, field_name: &str, domain: &str) -> ConfigResult<()>
where
    T: PartialOrd + Default + std::fmt::Display,
{
    if value > T::default() {
        Ok(())
    } else {
        Err(domain_error(
            domain,
            format!("{} must be greater than 0, got {}", field_name, value),
        ))
    }
}

/// Parse `url` and, when `allowed_schemes` is not empty, check its scheme
pub fn validate_url(
    url: &str,
    allowed_schemes: &[&str],
    field_name: &str,
    domain: &str,
) -> ConfigResult<()> {
    validate_required_string(url, field_name, domain)?;

    let scheme = url::Url::parse(url)
        .map_err(|e| domain_error(domain, format!("{} is not a valid URL: {}", field_name, e)))?
        .scheme()
        .to_string();

    if allowed_schemes.is_empty() || allowed_schemes.contains(&scheme.as_str()) {
        return Ok(());
    }
    Err(domain_error(
        domain,
        format!(
            "{} must use one of {}, got '{}'",
            field_name,
            allowed_schemes.join(", "),
            scheme
        ),
    ))
}
