#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, clippy::pedantic)]

//! Exchange an Okta session for temporary AWS credentials.
//!
//! The exchange authenticates against Okta, resolves the AWS application and role, fetches the
//! SAML assertion, and trades it with AWS STS (`AssumeRoleWithSAML`) for temporary credentials.
//! The credentials are then written to the shared credentials file or printed as shell exports.
//!
//! See [`run`] for the main entrypoint to the crate.
//!
//! ```no_run
//! # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use gimme_aws_creds::NonInteractive;
//!
//! let delivered = gimme_aws_creds::run(NonInteractive).await?;
//! eprintln!("{delivered:?}");
//! # Ok(()) }
//! ```

mod builder;
mod config;
mod credentials;
mod flow;
mod idp;
mod okta;
mod region;
mod resolver;
mod secret;
mod sink;
mod store;
mod sts;

use std::{fmt, io};

pub use crate::{
    builder::CredsFlowBuilder,
    config::{
        keys, Config, ConfigError, ConfigFile, ConfigSource, OutputMode, ProfilePolicy,
        UserCredentials,
    },
    credentials::TemporaryCredential,
    flow::{CredsFlow, FlowError, ReauthPolicy, Resolved},
    idp::{AppUrl, ApplicationLink, Assertion, IdentityProvider, IdpError, Lookup, Session},
    okta::OktaClient,
    region::Region,
    resolver::{Chooser, NonInteractive, Selection, SelectionRequired},
    secret::{EnvSecret, SecretSource},
    sink::{export_lines, CredentialSink, Delivered},
    store::CredentialStore,
    sts::{AssumeRoleWithSamlRequest, StsClient, TokenService, DEFAULT_DURATION_SECS},
};

const CLIENT_NAME: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Run a default credential exchange with the given `chooser`.
///
/// Configuration is read from `~/.okta_aws_login_config` (located with `OKTA_CONFIG`), the Okta
/// API key from `OKTA_API_KEY`, and the password from `OKTA_PASSWORD`. Depending on
/// `write_aws_creds`, credentials are written to the shared credentials file (located with
/// `AWS_SHARED_CREDENTIALS_FILE`) or printed to stdout as `export` statements.
///
/// For more flexible configuration see [`CredsFlowBuilder`].
///
/// # Errors
///
/// An error is returned if configuration is missing or invalid, or if any step of the exchange
/// fails. You can separate configuration errors from exchange errors by using
/// [`CredsFlowBuilder`] instead.
pub async fn run<C: Chooser>(chooser: C) -> Result<Delivered, GimmeError<C::Error>> {
    let flow = CredsFlowBuilder::new().chooser(chooser).build().await?;
    let sink =
        CredentialSink::for_config(flow.config(), CredentialStore::from_env, io::stdout())?;
    let delivered = flow.run(sink).await?;
    Ok(delivered)
}

/// An error indicating either misconfiguration or a failure during the exchange.
#[derive(Debug)]
pub enum GimmeError<P: std::error::Error + Send + Sync + 'static> {
    /// Configuration was missing or invalid.
    Config(ConfigError),

    /// Failure during the exchange.
    Flow(FlowError<P>),
}

impl<P: std::error::Error + Send + Sync + 'static> fmt::Display for GimmeError<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Config(error) => fmt::Display::fmt(error, f),
            Self::Flow(error) => fmt::Display::fmt(error, f),
        }
    }
}

impl<P: std::error::Error + Send + Sync + 'static> std::error::Error for GimmeError<P> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(error) => std::error::Error::source(error),
            Self::Flow(error) => std::error::Error::source(error),
        }
    }
}

impl<P: std::error::Error + Send + Sync + 'static> From<ConfigError> for GimmeError<P> {
    fn from(error: ConfigError) -> Self {
        Self::Config(error)
    }
}

impl<P: std::error::Error + Send + Sync + 'static> From<FlowError<P>> for GimmeError<P> {
    fn from(error: FlowError<P>) -> Self {
        Self::Flow(error)
    }
}

impl From<std::convert::Infallible> for ConfigError {
    fn from(error: std::convert::Infallible) -> Self {
        match error {}
    }
}
