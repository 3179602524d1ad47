use crate::{config::read_env, ConfigError};

const OKTA_API_KEY: &str = "OKTA_API_KEY";

/// A source for the Okta API key.
pub trait SecretSource {
    /// Retrieve the API key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not available from this source.
    fn api_key(&self) -> Result<String, ConfigError>;
}

/// Read the API key from an environment variable, `OKTA_API_KEY` by default.
#[derive(Clone, Debug)]
pub struct EnvSecret {
    var: String,
}

impl EnvSecret {
    /// Read the key from `var` instead of `OKTA_API_KEY`.
    #[must_use]
    pub fn with_var(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvSecret {
    fn default() -> Self {
        Self::with_var(OKTA_API_KEY)
    }
}

impl SecretSource for EnvSecret {
    fn api_key(&self) -> Result<String, ConfigError> {
        read_env(&self.var)
            .map_err(|error| {
                ConfigError::new(format!(
                    "invalid API key in environment variable {}: {error}",
                    self.var
                ))
            })?
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                ConfigError::new(format!(
                    "no Okta API key; set the {} environment variable",
                    self.var
                ))
            })
    }
}

impl SecretSource for String {
    fn api_key(&self) -> Result<String, ConfigError> {
        Ok(self.clone())
    }
}
