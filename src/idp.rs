//! The identity provider contract consumed by [`CredsFlow`](crate::CredsFlow).

use std::fmt;

use async_trait::async_trait;
use url::Url;

/// An authenticated IdP session.
///
/// Each call to [`IdentityProvider::authenticate`] yields its own session; a token from one
/// session is never assumed to be valid for another.
#[derive(Clone)]
pub struct Session {
    /// Bearer session token, required by subsequent IdP calls.
    pub token: String,

    /// The opaque handle identifying the authenticated user.
    pub user_id: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

/// An AWS application the user is assigned to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplicationLink {
    /// The display name, which is what users configure as `aws_appname`.
    pub label: String,

    /// The IdP's application instance identifier.
    pub app_instance_id: String,

    /// The URL that issues the SAML assertion for this application.
    pub link_url: Url,
}

/// The identifiers needed to resolve ARNs and fetch an assertion for an application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppUrl {
    /// The IdP's application instance identifier.
    pub instance_id: String,

    /// The URL that issues the SAML assertion for this application.
    pub link_url: Url,
}

impl From<ApplicationLink> for AppUrl {
    fn from(link: ApplicationLink) -> Self {
        Self {
            instance_id: link.app_instance_id,
            link_url: link.link_url,
        }
    }
}

/// A signed SAML assertion, base64 encoded.
///
/// The contents are not inspected by the pipeline.
#[derive(Clone, PartialEq, Eq)]
pub struct Assertion(String);

impl Assertion {
    /// Wrap a base64 SAML response.
    pub fn new(assertion: impl Into<String>) -> Self {
        Self(assertion.into())
    }

    /// The encoded assertion.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Assertion({} bytes)", self.0.len())
    }
}

/// The kinds of thing that can fail to resolve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lookup {
    /// An application, by label.
    Application,

    /// A role, by name.
    Role,

    /// An identity provider ARN, by application instance ID.
    IdentityProvider,
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Application => "application",
            Self::Role => "role",
            Self::IdentityProvider => "identity provider ARN for application",
        })
    }
}

/// An error reported by an [`IdentityProvider`].
#[derive(Debug, PartialEq, Eq)]
pub enum IdpError {
    /// The IdP rejected the user's credentials.
    Authentication(String),

    /// A named application, role, or ARN does not exist for this user.
    NotFound {
        /// What was being looked up.
        kind: Lookup,
        /// The name that was looked up.
        name: String,
    },

    /// The assertion could not be retrieved.
    AssertionRetrieval(String),

    /// Any other API failure, such as a network error or an unexpected response.
    Api(String),
}

impl IdpError {
    pub(crate) fn not_found(kind: Lookup, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for IdpError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Authentication(error) => write!(f, "authentication rejected: {error}"),
            Self::NotFound { kind, name } => write!(f, "{kind} {name:?} not found"),
            Self::AssertionRetrieval(error) => write!(f, "unable to retrieve assertion: {error}"),
            Self::Api(error) => write!(f, "identity provider API error: {error}"),
        }
    }
}

impl std::error::Error for IdpError {}

/// An identity provider that can issue SAML assertions for AWS.
///
/// No retry or MFA policy is implied by this trait; implementations define their own.
#[async_trait]
pub trait IdentityProvider {
    /// Perform primary authentication.
    async fn authenticate(&self, username: &str, password: &str) -> Result<Session, IdpError>;

    /// The AWS applications available to the session, in the IdP's order.
    async fn list_applications(&self, session: &Session) -> Result<Vec<ApplicationLink>, IdpError>;

    /// The role names available in `app`, in the IdP's order.
    async fn list_roles(
        &self,
        session: &Session,
        app: &AppUrl,
    ) -> Result<Vec<String>, IdpError>;

    /// Resolve an application label to its instance ID and link URL.
    async fn resolve_app_url(&self, session: &Session, app_name: &str)
        -> Result<AppUrl, IdpError>;

    /// Resolve the IAM identity provider ARN configured for an application instance.
    async fn resolve_idp_arn(&self, instance_id: &str) -> Result<String, IdpError>;

    /// Resolve the ARN of `role_name` within the application at `link_url`.
    async fn resolve_role_arn(
        &self,
        link_url: &Url,
        session_token: &str,
        role_name: &str,
    ) -> Result<String, IdpError>;

    /// Retrieve the SAML assertion for the application at `link_url`.
    async fn fetch_assertion(
        &self,
        link_url: &Url,
        session_token: &str,
    ) -> Result<Assertion, IdpError>;
}
