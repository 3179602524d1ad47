use std::{
    collections::BTreeMap,
    env, fmt, io,
    path::{Path, PathBuf},
    str::FromStr,
};

use futures::future::BoxFuture;
use tokio::fs;
use url::Url;
use zeroize::Zeroize;

use crate::{sts::DEFAULT_DURATION_SECS, ReauthPolicy, Region};

const OKTA_CONFIG: &str = "OKTA_CONFIG";
const OKTA_CONFIG_DEFAULT: &[&str] = &[".okta_aws_login_config"];
const SECTION: &str = "DEFAULT";

/// Keys understood in the configuration file.
pub mod keys {
    /// Base URL of the Okta organization.
    pub const ORG_URL: &str = "okta_org_url";
    /// Okta user name.
    pub const USERNAME: &str = "okta_username";
    /// Label of the AWS application; empty selects interactively.
    pub const APP_NAME: &str = "aws_appname";
    /// Name of the role to assume; empty selects interactively.
    pub const ROLE_NAME: &str = "aws_rolename";
    /// Whether to write the credentials file (`True`) or print exports (`False`).
    pub const WRITE_AWS_CREDS: &str = "write_aws_creds";
    /// Profile naming policy, `default` or `role`.
    pub const CRED_PROFILE: &str = "cred_profile";
    /// Requested credential lifetime in seconds.
    pub const DURATION: &str = "aws_default_duration";
    /// Region for the STS call.
    pub const REGION: &str = "aws_region";
    /// Whether to authenticate again before fetching the assertion.
    pub const REAUTHENTICATE: &str = "reauthenticate";

    pub(crate) const ALL: &[&str] = &[
        ORG_URL,
        USERNAME,
        APP_NAME,
        ROLE_NAME,
        WRITE_AWS_CREDS,
        CRED_PROFILE,
        DURATION,
        REGION,
        REAUTHENTICATE,
    ];
}

/// Settings for one credential exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the Okta organization.
    pub org_url: Url,

    /// The user to authenticate as.
    pub username: String,

    /// The application label, or `None` to choose interactively.
    pub app_name: Option<String>,

    /// The role name, or `None` to choose interactively.
    pub role_name: Option<String>,

    /// Where the credentials go.
    pub output: OutputMode,

    /// How the credentials profile is named in persist mode.
    pub cred_profile: ProfilePolicy,

    /// Requested credential lifetime in seconds.
    pub duration_secs: i32,

    /// Region for the STS call.
    pub region: Region,

    /// Whether the assertion is fetched with a fresh session.
    pub reauth: ReauthPolicy,
}

impl Config {
    /// Construct a config with defaults for everything but the organization and user.
    #[must_use]
    pub fn new(org_url: Url, username: impl Into<String>) -> Self {
        Self {
            org_url,
            username: username.into(),
            app_name: None,
            role_name: None,
            output: OutputMode::Emit,
            cred_profile: ProfilePolicy::Role,
            duration_secs: DEFAULT_DURATION_SECS,
            region: Region::default(),
            reauth: ReauthPolicy::default(),
        }
    }
}

/// Where credentials are delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputMode {
    /// Write them into the shared credentials file.
    Persist,

    /// Print shell `export` statements to stdout.
    Emit,
}

/// How the profile section is named when persisting credentials.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProfilePolicy {
    /// Always `default`.
    Default,

    /// The name of the assumed role.
    #[default]
    Role,
}

impl FromStr for ProfilePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "role" => Ok(Self::Role),
            other => Err(format!("expected `default` or `role`, got {other:?}")),
        }
    }
}

impl fmt::Display for ProfilePolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Default => "default",
            Self::Role => "role",
        })
    }
}

/// A source of [`Config`].
///
/// This mirrors [`ConfigFile`] for callers that hold configuration in some other form.
pub trait ConfigSource {
    /// The future returned by the config source.
    type Future: std::future::Future<Output = Result<Config, Self::Error>>;

    /// The error that might occur when sourcing the configuration.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load the configuration.
    fn load(self) -> Self::Future;
}

impl ConfigSource for Config {
    type Future = futures::future::Ready<Result<Self, Self::Error>>;

    type Error = std::convert::Infallible;

    fn load(self) -> Self::Future {
        futures::future::ready(Ok(self))
    }
}

/// The `~/.okta_aws_login_config` file, with optional overrides.
///
/// The file location comes from the `OKTA_CONFIG` environment variable unless set with
/// [`with_path`](Self::with_path). Values set with [`with_value`](Self::with_value) take
/// precedence over the file.
#[derive(Clone, Debug, Default)]
pub struct ConfigFile {
    path: Option<PathBuf>,
    overrides: BTreeMap<String, String>,
}

impl ConfigFile {
    /// Set the location of the configuration file.
    #[must_use]
    pub fn with_path(self, path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..self
        }
    }

    /// Override a single key.
    #[must_use]
    pub fn with_value(mut self, key: &str, value: impl Into<String>) -> Self {
        self.overrides.insert(key.to_string(), value.into());
        self
    }

    /// The resolved file location.
    ///
    /// # Errors
    ///
    /// Returns an error if `OKTA_CONFIG` is invalid or the home directory is unknown.
    pub fn path(&self) -> Result<PathBuf, ConfigError> {
        self.path
            .clone()
            .map_or_else(|| env_path(OKTA_CONFIG, OKTA_CONFIG_DEFAULT), Ok)
    }

    /// The file's values with overrides applied.
    ///
    /// A missing file is treated as empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub async fn values(&self) -> Result<BTreeMap<String, String>, ConfigError> {
        let path = self.path()?;
        let mut values = match fs::read_to_string(&path).await {
            Ok(content) => parse_section(&content, SECTION),
            Err(error) if error.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(error) => {
                return Err(ConfigError::new(format!(
                    "unable to read config file {}: {error}",
                    path.display()
                )))
            }
        };
        values.extend(self.overrides.clone());
        Ok(values)
    }

    /// Write the file's values, with overrides applied, back to the file.
    ///
    /// Returns the path that was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or written, or if the merged values do not
    /// form a valid configuration.
    pub async fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = self.path()?;
        let values = self.values().await?;
        to_config(&values, &path)?;

        let mut content = format!("[{SECTION}]\n");
        for key in keys::ALL {
            if let Some(value) = values.get(*key) {
                content.push_str(&format!("{key} = {value}\n"));
            }
        }
        for (key, value) in values.iter().filter(|(key, _)| !keys::ALL.contains(&key.as_str())) {
            content.push_str(&format!("{key} = {value}\n"));
        }

        let write = async {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(&path, content).await
        };
        write.await.map_err(|error| {
            ConfigError::new(format!(
                "unable to write config file {}: {error}",
                path.display()
            ))
        })?;
        Ok(path)
    }
}

impl ConfigSource for ConfigFile {
    type Future = BoxFuture<'static, Result<Config, Self::Error>>;

    type Error = ConfigError;

    fn load(self) -> Self::Future {
        Box::pin(async move {
            let path = self.path()?;
            let values = self.values().await?;
            to_config(&values, &path)
        })
    }
}

/// The user's IdP credentials.
///
/// The password is zeroed when this is dropped.
pub struct UserCredentials {
    /// The user name.
    pub username: String,
    password: String,
}

impl UserCredentials {
    /// Construct credentials for `username`.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }

    /// Zero the password.
    pub fn clear(&mut self) {
        self.password.zeroize();
    }
}

impl Drop for UserCredentials {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("UserCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// An error indicating missing or invalid configuration.
///
/// The error message should be sufficient to aid end-user debugging.
#[derive(Debug)]
pub struct ConfigError(String);

impl ConfigError {
    pub(crate) fn new(error: impl Into<String>) -> Self {
        Self(error.into())
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for ConfigError {}

pub(crate) fn read_env(name: &str) -> Result<Option<String>, String> {
    env::var(name).map(Some).or_else(|error| match error {
        env::VarError::NotPresent => Ok(None),
        env::VarError::NotUnicode(data) => Err(format!("{data:?} contains invalid UTF-8")),
    })
}

/// Read a path from the environment, defaulting to `default` under the home directory.
pub(crate) fn env_path(var: &str, default: &[&str]) -> Result<PathBuf, ConfigError> {
    read_env(var)
        .map_err(|error| {
            ConfigError::new(format!("invalid path in environment variable {var}: {error}"))
        })?
        .filter(|path| !path.is_empty())
        .map_or_else(
            || {
                let mut path = dirs_next::home_dir()
                    .ok_or_else(|| ConfigError::new("could not determine home directory"))?;
                for segment in default {
                    path.push(segment);
                }
                Ok(path)
            },
            |path| Ok(PathBuf::from(path)),
        )
}

fn parse_section_name(line: &str) -> Option<&str> {
    line.strip_prefix('[')
        .and_then(|line| line.strip_suffix(']'))
        .map(str::trim)
}

fn parse_section(content: &str, section: &str) -> BTreeMap<String, String> {
    let mut in_section = false;
    let mut values = BTreeMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(name) = parse_section_name(line) {
            in_section = name == section;
        } else if in_section {
            if let Some((key, value)) = parse_entry(line) {
                values.insert(key.to_ascii_lowercase(), value.to_string());
            }
        }
    }

    values
}

/// Split an INI `key = value` or `key: value` line at the first separator.
///
/// Comment lines are not entries.
pub(crate) fn parse_entry(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.starts_with('#') || line.starts_with(';') {
        return None;
    }
    let split = line.find(['=', ':'])?;
    Some((line[..split].trim(), line[split + 1..].trim()))
}

fn to_config(values: &BTreeMap<String, String>, path: &Path) -> Result<Config, ConfigError> {
    let invalid = |key: &str, error: &dyn fmt::Display| {
        ConfigError::new(format!(
            "invalid {key} in config file {}: {error}",
            path.display()
        ))
    };
    let get = |key: &str| values.get(key).map(String::as_str).filter(|value| !value.is_empty());

    let missing: Vec<_> = [keys::ORG_URL, keys::USERNAME]
        .into_iter()
        .filter(|key| get(*key).is_none())
        .collect();
    let (Some(org_url), Some(username)) = (get(keys::ORG_URL), get(keys::USERNAME)) else {
        return Err(ConfigError::new(format!(
            "incomplete configuration in config file {}; missing: {}",
            path.display(),
            missing.join(", ")
        )));
    };

    let mut config = Config::new(
        org_url
            .parse()
            .map_err(|error| invalid(keys::ORG_URL, &error))?,
        username,
    );
    config.app_name = get(keys::APP_NAME).map(ToString::to_string);
    config.role_name = get(keys::ROLE_NAME).map(ToString::to_string);

    if let Some(value) = get(keys::WRITE_AWS_CREDS) {
        let persist =
            parse_bool(value).map_err(|error| invalid(keys::WRITE_AWS_CREDS, &error))?;
        config.output = if persist {
            OutputMode::Persist
        } else {
            OutputMode::Emit
        };
    }
    if let Some(value) = get(keys::CRED_PROFILE) {
        config.cred_profile = value
            .parse()
            .map_err(|error| invalid(keys::CRED_PROFILE, &error))?;
    }
    if let Some(value) = get(keys::DURATION) {
        config.duration_secs = value
            .parse()
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or_else(|| invalid(keys::DURATION, &format!("expected seconds, got {value:?}")))?;
    }
    if let Some(value) = get(keys::REGION) {
        config.region = Region::new(value.to_string());
    }
    if let Some(value) = get(keys::REAUTHENTICATE) {
        let reauthenticate =
            parse_bool(value).map_err(|error| invalid(keys::REAUTHENTICATE, &error))?;
        config.reauth = if reauthenticate {
            ReauthPolicy::Reauthenticate
        } else {
            ReauthPolicy::ReuseSession
        };
    }

    Ok(config)
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(format!("expected a boolean, got {value:?}")),
    }
}
