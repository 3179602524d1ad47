use std::{
    io::{self, Write},
    path::PathBuf,
};

use crate::{
    config::{OutputMode, ProfilePolicy},
    store::CredentialStore,
    Config, ConfigError, TemporaryCredential,
};

const DEFAULT_PROFILE: &str = "default";

/// Where credentials are delivered at the end of a run.
///
/// Exactly one mode is used per run.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug)]
pub enum CredentialSink<W = io::Stdout> {
    /// Write the credentials into a profile of the shared credentials file.
    Persist {
        /// The credentials file.
        store: CredentialStore,
        /// How the profile is named.
        profile: ProfilePolicy,
    },

    /// Print shell `export` statements.
    Emit(W),
}

impl<W: Write> CredentialSink<W> {
    /// Select the sink for `config`'s output mode.
    ///
    /// `store` is only called in persist mode, so emit mode never needs a credentials file
    /// location. `out` is only written to in emit mode.
    ///
    /// # Errors
    ///
    /// Returns the error from `store`.
    pub fn for_config<F>(config: &Config, store: F, out: W) -> Result<Self, ConfigError>
    where
        F: FnOnce() -> Result<CredentialStore, ConfigError>,
    {
        Ok(match config.output {
            OutputMode::Persist => Self::Persist {
                store: store()?,
                profile: config.cred_profile,
            },
            OutputMode::Emit => Self::Emit(out),
        })
    }

    /// Deliver `credential` obtained for `role_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials file cannot be updated or the output cannot be
    /// written.
    pub async fn write(
        &mut self,
        credential: &TemporaryCredential,
        role_name: &str,
    ) -> Result<Delivered, String> {
        match self {
            Self::Persist { store, profile } => {
                let profile = profile_name(*profile, role_name);
                tracing::info!(path = %store.path().display(), %profile, "writing credentials");
                store.write_profile(profile, credential).await?;
                Ok(Delivered::Persisted {
                    path: store.path().to_path_buf(),
                    profile: profile.to_string(),
                })
            }
            Self::Emit(out) => {
                // a single write, so a failure can't leave partial exports behind
                out.write_all(export_lines(credential).as_bytes())
                    .and_then(|()| out.flush())
                    .map_err(|error| format!("unable to write credentials: {error}"))?;
                Ok(Delivered::Emitted)
            }
        }
    }
}

/// What a [`CredentialSink`] did with the credentials.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivered {
    /// The credentials were written to `profile` in the file at `path`.
    Persisted {
        /// The credentials file.
        path: PathBuf,
        /// The profile section written.
        profile: String,
    },

    /// The credentials were printed as `export` statements.
    Emitted,
}

fn profile_name(policy: ProfilePolicy, role_name: &str) -> &str {
    match policy {
        ProfilePolicy::Default => DEFAULT_PROFILE,
        ProfilePolicy::Role => role_name,
    }
}

/// Render `credential` as shell `export` statements.
#[must_use]
pub fn export_lines(credential: &TemporaryCredential) -> String {
    format!(
        "export AWS_ACCESS_KEY_ID={}\nexport AWS_SECRET_ACCESS_KEY={}\nexport AWS_SESSION_TOKEN={}\n",
        credential.access_key_id, credential.secret_access_key, credential.session_token
    )
}
