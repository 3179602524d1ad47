// A wrapper around the SDK `Region` to avoid exposing it in the API.

use std::{borrow::Cow, fmt};

use aws_sdk_sts::config::Region as SdkRegion;

/// The region STS calls are sent to when none is configured.
pub(crate) const DEFAULT_REGION: &str = "us-east-1";

/// An AWS region.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct Region(pub(crate) SdkRegion);

impl Region {
    /// Construct a new `Region` for the given string.
    pub fn new(region: impl Into<Cow<'static, str>>) -> Self {
        Self(SdkRegion::new(region))
    }
}

impl Default for Region {
    fn default() -> Self {
        Self::new(DEFAULT_REGION)
    }
}

impl AsRef<str> for Region {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
