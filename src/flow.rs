use std::{fmt, io};

use url::Url;

use crate::{
    idp::{AppUrl, Assertion, IdentityProvider, IdpError, Lookup, Session},
    resolver::{self, Chooser, Selection},
    sink::{CredentialSink, Delivered},
    sts::{AssumeRoleWithSamlRequest, TokenService},
    Config, CredsFlowBuilder, TemporaryCredential, UserCredentials,
};

/// Which session token is used to fetch the assertion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReauthPolicy {
    /// Authenticate a second time and fetch the assertion with the new session's token.
    ///
    /// Required for IdPs whose session tokens are consumed by the role lookup.
    #[default]
    Reauthenticate,

    /// Fetch the assertion with the token of the session used for resolution.
    ReuseSession,
}

/// Everything resolved before the assertion is fetched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved {
    /// The application label.
    pub app_name: String,

    /// The role name.
    pub role_name: String,

    /// The application's instance ID and link URL.
    pub app_url: AppUrl,

    /// The IAM SAML provider ARN.
    pub idp_arn: String,

    /// The IAM role ARN.
    pub role_arn: String,
}

/// A configured credential exchange.
///
/// A flow runs once: [`run`](Self::run) consumes it and clears the user's password.
#[allow(clippy::module_name_repetitions)]
pub struct CredsFlow<I, T, C> {
    config: Config,
    user: UserCredentials,
    idp: I,
    tokens: T,
    chooser: C,
}

impl CredsFlow<(), (), ()> {
    /// Construct a builder for a flow backed by Okta and AWS STS.
    #[must_use]
    pub fn builder() -> CredsFlowBuilder {
        CredsFlowBuilder::default()
    }
}

impl<I, T, C> CredsFlow<I, T, C>
where
    I: IdentityProvider,
    T: TokenService,
    C: Chooser,
{
    /// Assemble a flow from its collaborators.
    pub fn new(config: Config, user: UserCredentials, idp: I, tokens: T, chooser: C) -> Self {
        Self {
            config,
            user,
            idp,
            tokens,
            chooser,
        }
    }

    /// The flow's configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Exchange the IdP session for credentials and deliver them to `sink`.
    ///
    /// The user's password is cleared before returning, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns the first failure; see [`FlowError`]. Nothing is delivered to `sink` unless every
    /// earlier step succeeded.
    pub async fn run<W: io::Write>(
        mut self,
        mut sink: CredentialSink<W>,
    ) -> Result<Delivered, FlowError<C::Error>> {
        let result: Result<Delivered, FlowError<C::Error>> = async {
            let (credential, resolved) = self.credentials().await?;
            sink.write(&credential, &resolved.role_name)
                .await
                .map_err(FlowError::Persistence)
        }
        .await;
        self.user.clear();
        result
    }

    /// Exchange the IdP session for credentials, without delivering them.
    ///
    /// # Errors
    ///
    /// Returns the first failure; see [`FlowError`].
    pub async fn credentials(
        &self,
    ) -> Result<(TemporaryCredential, Resolved), FlowError<C::Error>> {
        let session = self.login().await?;
        let resolved = self.resolve(&session).await?;
        let assertion = self.assertion(session, &resolved.app_url.link_url).await?;

        tracing::info!(role_arn = %resolved.role_arn, "exchanging assertion for credentials");
        let credential = self
            .tokens
            .assume_role_with_saml(AssumeRoleWithSamlRequest {
                role_arn: resolved.role_arn.clone(),
                principal_arn: resolved.idp_arn.clone(),
                assertion,
                duration_secs: self.config.duration_secs,
            })
            .await
            .map_err(FlowError::TokenExchange)?;
        tracing::debug!(?credential, "obtained credentials");

        Ok((credential, resolved))
    }

    async fn login(&self) -> Result<Session, FlowError<C::Error>> {
        tracing::info!(username = %self.user.username, "authenticating");
        let session = self
            .idp
            .authenticate(&self.user.username, self.user.password())
            .await?;
        Ok(session)
    }

    async fn resolve(&self, session: &Session) -> Result<Resolved, FlowError<C::Error>> {
        let app_selection = Selection::from(self.config.app_name.clone());
        let role_selection = Selection::from(self.config.role_name.clone());

        let app_name =
            resolver::application(&app_selection, &self.idp, session, &self.chooser).await?;
        let app_url = self.idp.resolve_app_url(session, &app_name).await?;
        let role_name =
            resolver::role(&role_selection, &self.idp, session, &app_url, &self.chooser).await?;
        tracing::info!(%app_name, %role_name, "resolved application and role");

        let idp_arn = self.idp.resolve_idp_arn(&app_url.instance_id).await?;
        let role_arn = self
            .idp
            .resolve_role_arn(&app_url.link_url, &session.token, &role_name)
            .await?;
        tracing::debug!(%idp_arn, %role_arn, "resolved ARNs");

        Ok(Resolved {
            app_name,
            role_name,
            app_url,
            idp_arn,
            role_arn,
        })
    }

    async fn assertion(
        &self,
        session: Session,
        link_url: &Url,
    ) -> Result<Assertion, FlowError<C::Error>> {
        let session = match self.config.reauth {
            ReauthPolicy::Reauthenticate => {
                tracing::info!("authenticating again for the assertion");
                self.login().await?
            }
            ReauthPolicy::ReuseSession => session,
        };
        let assertion = self.idp.fetch_assertion(link_url, &session.token).await?;
        Ok(assertion)
    }
}

impl<I, T, C> fmt::Debug for CredsFlow<I, T, C>
where
    I: fmt::Debug,
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CredsFlow")
            .field("config", &self.config)
            .field("user", &self.user)
            .field("idp", &self.idp)
            .field("tokens", &self.tokens)
            .field("chooser", &"_")
            .finish()
    }
}

/// An error that occurred during the credential exchange.
#[derive(Debug)]
pub enum FlowError<P: std::error::Error + Send + Sync + 'static> {
    /// The IdP rejected the user's credentials.
    Authentication(String),

    /// A configured or chosen application, role, or ARN does not exist for this user.
    NotFound {
        /// What was being looked up.
        kind: Lookup,
        /// The name that was looked up.
        name: String,
    },

    /// The assertion could not be retrieved, for example because the session token expired.
    AssertionRetrieval(String),

    /// STS rejected the assertion or could not be reached. The message is STS's own.
    TokenExchange(String),

    /// The credentials could not be written.
    Persistence(String),

    /// Any other IdP API failure.
    Idp(String),

    /// Indicates that an error occurred while choosing an application or role.
    ///
    /// See [`Chooser`] for more information.
    Selection(P),

    /// Interactive selection was needed but the IdP offered no options.
    NoChoices(Lookup),

    /// The [`Chooser`] returned an index outside the options.
    InvalidChoice {
        /// What was being chosen.
        kind: Lookup,
        /// The index returned.
        index: usize,
    },
}

impl<P> fmt::Display for FlowError<P>
where
    P: std::error::Error + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Authentication(error) => write!(f, "authentication failed: {error}"),
            Self::NotFound { kind, name } => write!(f, "{kind} {name:?} not found"),
            Self::AssertionRetrieval(error) => {
                write!(f, "unable to retrieve SAML assertion: {error}")
            }
            Self::TokenExchange(error) => write!(f, "AssumeRoleWithSAML failed: {error}"),
            Self::Persistence(error) => write!(f, "unable to save credentials: {error}"),
            Self::Idp(error) => write!(f, "identity provider error: {error}"),
            Self::Selection(error) => write!(f, "selection failed: {error}"),
            Self::NoChoices(kind) => write!(f, "no {kind} available to choose from"),
            Self::InvalidChoice { kind, index } => write!(f, "invalid {kind} choice {index}"),
        }
    }
}

impl<P: std::error::Error + Send + Sync + 'static> std::error::Error for FlowError<P> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Selection(error) => Some(error),
            _ => None,
        }
    }
}

impl<P: std::error::Error + Send + Sync + 'static> From<IdpError> for FlowError<P> {
    fn from(error: IdpError) -> Self {
        match error {
            IdpError::Authentication(error) => Self::Authentication(error),
            IdpError::NotFound { kind, name } => Self::NotFound { kind, name },
            IdpError::AssertionRetrieval(error) => Self::AssertionRetrieval(error),
            IdpError::Api(error) => Self::Idp(error),
        }
    }
}
