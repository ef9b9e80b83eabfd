//! Operating-system tags that select a task builder variant.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Closed set of supported server operating systems.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum OsTag {
    #[default]
    Linux,
    /// Solaris family (SmartOS, illumos, Solaris) managed through SMF.
    SunOs,
}

impl OsTag {
    pub const ALL: [OsTag; 2] = [OsTag::Linux, OsTag::SunOs];

    pub fn as_str(&self) -> &'static str {
        match self {
            OsTag::Linux => "linux",
            OsTag::SunOs => "sunos",
        }
    }

    fn supported() -> Vec<String> {
        Self::ALL.iter().map(|os| os.as_str().to_string()).collect()
    }
}

impl fmt::Display for OsTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OsTag {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "linux" => Ok(OsTag::Linux),
            "sunos" | "solaris" | "smartos" | "illumos" => Ok(OsTag::SunOs),
            other => Err(Error::os_unsupported(other, Self::supported())),
        }
    }
}

impl TryFrom<String> for OsTag {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value
            .parse::<OsTag>()
            .map_err(|err| format!("{} (supported: {})", err.message, Self::supported().join(", ")))
    }
}

impl From<OsTag> for String {
    fn from(os: OsTag) -> Self {
        os.as_str().to_string()
    }
}
