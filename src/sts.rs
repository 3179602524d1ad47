//! Cleaned up AWS STS API.

use std::fmt;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sts::{
    error::DisplayErrorContext, operation::assume_role_with_saml::AssumeRoleWithSamlOutput,
};
use chrono::{DateTime, Utc};

use crate::{idp::Assertion, Region, TemporaryCredential};

/// The default lifetime requested for temporary credentials, in seconds.
pub const DEFAULT_DURATION_SECS: i32 = 3600;

/// A service that exchanges SAML assertions for temporary credentials.
///
/// [`StsClient`] is the real implementation. Rejections and transport failures are both returned
/// as the error message, unchanged; implementations must not retry.
#[async_trait]
pub trait TokenService {
    /// Exchange `request.assertion` for credentials for `request.role_arn`.
    async fn assume_role_with_saml(
        &self,
        request: AssumeRoleWithSamlRequest,
    ) -> Result<TemporaryCredential, String>;
}

/// AWS STS client.
pub struct StsClient {
    inner: aws_sdk_sts::Client,
}

impl StsClient {
    /// Construct a client for the given `region`.
    ///
    /// `AssumeRoleWithSAML` is an unsigned call, so no credentials provider is configured.
    pub async fn new(region: Region) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(region.0)
            .no_credentials()
            .load()
            .await;

        Self {
            inner: aws_sdk_sts::Client::new(&config),
        }
    }
}

#[async_trait]
impl TokenService for StsClient {
    async fn assume_role_with_saml(
        &self,
        request: AssumeRoleWithSamlRequest,
    ) -> Result<TemporaryCredential, String> {
        self.inner
            .assume_role_with_saml()
            .role_arn(request.role_arn)
            .principal_arn(request.principal_arn)
            .saml_assertion(request.assertion.into_inner())
            .duration_seconds(request.duration_secs)
            .send()
            .await
            .map_err(|error| DisplayErrorContext(error).to_string())
            .and_then(AssumeRoleWithSamlResponse::try_from)
            .map(Into::into)
    }
}

impl fmt::Debug for StsClient {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("StsClient").finish_non_exhaustive()
    }
}

/// Parameters for `AssumeRoleWithSAML`, passed through exactly as resolved.
#[derive(Debug)]
pub struct AssumeRoleWithSamlRequest {
    /// The role to assume.
    pub role_arn: String,

    /// The SAML identity provider registered in IAM.
    pub principal_arn: String,

    /// The base64 SAML response from the IdP.
    pub assertion: Assertion,

    /// Requested credential lifetime.
    pub duration_secs: i32,
}

#[derive(Debug)]
pub(crate) struct AssumeRoleWithSamlResponse {
    pub(crate) access_key_id: String,
    pub(crate) secret_access_key: String,
    pub(crate) session_token: String,
    pub(crate) expires_at: DateTime<Utc>,
}

impl TryFrom<AssumeRoleWithSamlOutput> for AssumeRoleWithSamlResponse {
    type Error = String;

    fn try_from(res: AssumeRoleWithSamlOutput) -> Result<Self, Self::Error> {
        macro_rules! invalid_res {
            ($msg:literal) => {
                concat!("invalid AssumeRoleWithSAML response: ", $msg)
            };
        }

        let credentials = res
            .credentials
            .ok_or(invalid_res!("missing credentials"))?;
        let expiration = credentials.expiration();
        Ok(Self {
            expires_at: DateTime::from_timestamp(expiration.secs(), expiration.subsec_nanos())
                .ok_or(invalid_res!("expiration out of range"))?,
            access_key_id: credentials.access_key_id,
            secret_access_key: credentials.secret_access_key,
            session_token: credentials.session_token,
        })
    }
}
