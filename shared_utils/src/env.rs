use std::str::FromStr;

use thiserror::Error;

/// Errors raised while reading process environment variables.
#[derive(Debug, Error)]
pub enum EnvError {
    /// An environment variable required by the application is not set.
    #[error("Missing environment variable: {0}")]
    Missing(String),

    /// The variable is set but is empty after trimming.
    #[error("Environment variable {0} is empty")]
    Empty(String),

    /// The variable could not be parsed into the requested type.
    #[error("Environment variable {name} has invalid value {value:?}: {message}")]
    Invalid {
        name: String,
        value: String,
        message: String,
    },
}

/// Reads an environment variable, returning a structured error if it's missing
/// or blank.
///
/// # Arguments
/// * `name` - The name of the environment variable to read.
pub fn get_env_var(name: &str) -> Result<String, EnvError> {
    let value = std::env::var(name).map_err(|_| EnvError::Missing(name.to_string()))?;
    if value.trim().is_empty() {
        return Err(EnvError::Empty(name.to_string()));
    }
    Ok(value)
}

/// Reads an optional environment variable and parses it, falling back to
/// `default` when it is not set.
pub fn get_env_parse_or<T>(name: &str, default: T) -> Result<T, EnvError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|e| EnvError::Invalid {
            name: name.to_string(),
            value: raw,
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
