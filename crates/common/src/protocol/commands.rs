// Storage command tags exchanged between the client shell and the
// persistence layer.

use std::fmt;
use std::str::FromStr;

pub const STORAGE_READ_ENVIRONMENT: &str = "storage.read_environment";
pub const STORAGE_WRITE_ENVIRONMENT: &str = "storage.write_environment";
pub const STORAGE_DELETE_ENVIRONMENT: &str = "storage.delete_environment";
pub const STORAGE_READ_SETTINGS: &str = "storage.read_settings";
pub const STORAGE_WRITE_SETTINGS: &str = "storage.write_settings";
pub const STORAGE_FINGERPRINT: &str = "storage.fingerprint";

/// Every command a registry must be able to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandTag {
    ReadEnvironment,
    WriteEnvironment,
    DeleteEnvironment,
    ReadSettings,
    WriteSettings,
    Fingerprint,
}

impl CommandTag {
    pub const ALL: [CommandTag; 6] = [
        Self::ReadEnvironment,
        Self::WriteEnvironment,
        Self::DeleteEnvironment,
        Self::ReadSettings,
        Self::WriteSettings,
        Self::Fingerprint,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadEnvironment => STORAGE_READ_ENVIRONMENT,
            Self::WriteEnvironment => STORAGE_WRITE_ENVIRONMENT,
            Self::DeleteEnvironment => STORAGE_DELETE_ENVIRONMENT,
            Self::ReadSettings => STORAGE_READ_SETTINGS,
            Self::WriteSettings => STORAGE_WRITE_SETTINGS,
            Self::Fingerprint => STORAGE_FINGERPRINT,
        }
    }
}

impl fmt::Display for CommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCommandTag(pub String);

impl fmt::Display for UnknownCommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown command `{}`", self.0)
    }
}

impl std::error::Error for UnknownCommandTag {}

impl FromStr for CommandTag {
    type Err = UnknownCommandTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| UnknownCommandTag(s.to_string()))
    }
}
