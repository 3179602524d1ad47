use zeroize::Zeroizing;

use crate::{
    config::read_env, Chooser, ConfigError, ConfigFile, ConfigSource, CredsFlow, EnvSecret,
    NonInteractive, OktaClient, SecretSource, StsClient, UserCredentials,
};

const OKTA_PASSWORD: &str = "OKTA_PASSWORD";

/// Builder for a [`CredsFlow`] backed by Okta and AWS STS.
///
/// # Example
///
/// ```no_run
/// # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use std::convert::Infallible;
///
/// use gimme_aws_creds::{keys, ConfigFile, CredsFlowBuilder, Lookup};
///
/// let flow = CredsFlowBuilder::new()
///     // read the config from "$PWD/.okta" and always assume the Admin role
///     .config(ConfigFile::default().with_path(".okta").with_value(keys::ROLE_NAME, "Admin"))
///     // take the first application offered
///     .chooser(|_: Lookup, _: &[String]| Ok::<_, Infallible>(0))
///     .password("hunter2")
///     .build()
///     .await?;
///
/// let (credential, resolved) = flow.credentials().await?;
/// println!("obtained {credential:?} for {}", resolved.role_arn);
/// # Ok(())
/// # }
/// ```
#[allow(clippy::module_name_repetitions)]
pub struct CredsFlowBuilder<S = ConfigFile, C = NonInteractive, K = EnvSecret> {
    config_source: S,
    chooser: C,
    secret: K,
    password: Option<Zeroizing<String>>,
}

impl CredsFlowBuilder {
    /// Construct a builder with default configuration.
    ///
    /// Configuration comes from `~/.okta_aws_login_config`, the API key from `OKTA_API_KEY`, the
    /// password from `OKTA_PASSWORD`, and interactive selection is disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for CredsFlowBuilder {
    fn default() -> Self {
        Self {
            config_source: ConfigFile::default(),
            chooser: NonInteractive,
            secret: EnvSecret::default(),
            password: None,
        }
    }
}

impl<S, C, K> CredsFlowBuilder<S, C, K> {
    /// Set the configuration source.
    #[must_use]
    pub fn config<NewS>(self, config_source: NewS) -> CredsFlowBuilder<NewS, C, K>
    where
        NewS: ConfigSource,
    {
        CredsFlowBuilder {
            config_source,
            chooser: self.chooser,
            secret: self.secret,
            password: self.password,
        }
    }

    /// Set the chooser used when the application or role is not configured.
    #[must_use]
    pub fn chooser<NewC>(self, chooser: NewC) -> CredsFlowBuilder<S, NewC, K>
    where
        NewC: Chooser,
    {
        CredsFlowBuilder {
            config_source: self.config_source,
            chooser,
            secret: self.secret,
            password: self.password,
        }
    }

    /// Set the source of the Okta API key.
    #[must_use]
    pub fn secret<NewK>(self, secret: NewK) -> CredsFlowBuilder<S, C, NewK>
    where
        NewK: SecretSource,
    {
        CredsFlowBuilder {
            config_source: self.config_source,
            chooser: self.chooser,
            secret,
            password: self.password,
        }
    }

    /// Set the user's password instead of reading `OKTA_PASSWORD`.
    #[must_use]
    pub fn password(self, password: impl Into<String>) -> Self {
        Self {
            password: Some(Zeroizing::new(password.into())),
            ..self
        }
    }
}

impl<S, C, K> CredsFlowBuilder<S, C, K>
where
    S: ConfigSource,
    S::Error: Into<ConfigError>,
    C: Chooser,
    K: SecretSource,
{
    /// Build a [`CredsFlow`] with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded, or the password or API key is
    /// unavailable.
    pub async fn build(self) -> Result<CredsFlow<OktaClient, StsClient, C>, ConfigError> {
        let config = self.config_source.load().await.map_err(Into::into)?;

        let password = match self.password {
            Some(password) => password,
            None => read_env(OKTA_PASSWORD)
                .map_err(|error| {
                    ConfigError::new(format!(
                        "invalid password in environment variable {OKTA_PASSWORD}: {error}"
                    ))
                })?
                .map(Zeroizing::new)
                .ok_or_else(|| {
                    ConfigError::new(format!(
                        "no password for {}; set {OKTA_PASSWORD}",
                        config.username
                    ))
                })?,
        };
        let api_key = self.secret.api_key()?;

        let idp = OktaClient::new(&config.org_url, api_key).map_err(ConfigError::new)?;
        let tokens = StsClient::new(config.region.clone()).await;
        let user = UserCredentials::new(config.username.clone(), password.as_str());

        Ok(CredsFlow::new(config, user, idp, tokens, self.chooser))
    }
}
