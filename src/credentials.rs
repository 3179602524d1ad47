use std::fmt;

use chrono::{DateTime, Utc};

use crate::sts;

/// Temporary AWS credentials obtained from a SAML assertion.
///
/// The fields of this struct are obviously pretty sensitive, and should be handled with care.
/// The secret and session token are not printed in `Debug` output.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, PartialEq, Eq)]
pub struct TemporaryCredential {
    /// The access key ID.
    pub access_key_id: String,

    /// The secret access key.
    pub secret_access_key: String,

    /// The session token.
    pub session_token: String,

    /// When the credentials expire.
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for TemporaryCredential {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TemporaryCredential")
            .field("access_key_id", &self.access_key_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl From<sts::AssumeRoleWithSamlResponse> for TemporaryCredential {
    fn from(res: sts::AssumeRoleWithSamlResponse) -> Self {
        Self {
            access_key_id: res.access_key_id,
            secret_access_key: res.secret_access_key,
            session_token: res.session_token,
            expires_at: res.expires_at,
        }
    }
}
