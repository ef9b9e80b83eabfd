use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigInvalidJson,
    ConfigInvalidValue,

    ValidationInvalidArgument,

    SiteNotFound,
    OsUnsupported,

    SshIdentityFileNotFound,
    SshConnectFailed,

    DeployNoSessions,
    DeployBuildFailed,
    DeployArchiveFailed,

    InternalIoError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::SiteNotFound => "site.not_found",
            ErrorCode::OsUnsupported => "os.unsupported",

            ErrorCode::SshIdentityFileNotFound => "ssh.identity_file_not_found",
            ErrorCode::SshConnectFailed => "ssh.connect_failed",

            ErrorCode::DeployNoSessions => "deploy.no_sessions",
            ErrorCode::DeployBuildFailed => "deploy.build_failed",
            ErrorCode::DeployArchiveFailed => "deploy.archive_failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidJsonDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotFoundDetails {
    pub id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub available: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OsUnsupportedDetails {
    pub os: String,
    pub supported: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SshIdentityFileNotFoundDetails {
    pub host: String,
    pub identity_file: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConnectFailedDetails {
    pub host: String,
    pub exit_code: i32,
    pub stderr: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildFailedDetails {
    pub command: String,
    pub exit_code: i32,
    pub build_location: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveFailedDetails {
    pub bundle_path: String,
    pub build_location: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    fn details_of<T: Serialize>(details: T) -> Value {
        serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let details = Self::details_of(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.into(),
            id,
            tried,
        });

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            "Invalid argument",
            details,
        )
    }

    pub fn config_invalid_json(path: impl Into<String>, error: impl Into<String>) -> Self {
        let details = Self::details_of(ConfigInvalidJsonDetails {
            path: path.into(),
            error: error.into(),
        });

        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid configuration file",
            details,
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let details = Self::details_of(ConfigInvalidValueDetails {
            key: key.into(),
            value,
            problem: problem.into(),
        });

        Self::new(
            ErrorCode::ConfigInvalidValue,
            "Invalid configuration value",
            details,
        )
    }

    pub fn site_not_found(id: impl Into<String>, available: Vec<String>) -> Self {
        let details = Self::details_of(NotFoundDetails {
            id: id.into(),
            available,
        });
        Self::new(ErrorCode::SiteNotFound, "Site not found", details)
            .with_hint("Check the 'sites' section of the configuration file")
    }

    pub fn os_unsupported(os: impl Into<String>, supported: Vec<String>) -> Self {
        let os = os.into();
        let details = Self::details_of(OsUnsupportedDetails {
            os: os.clone(),
            supported,
        });
        Self::new(
            ErrorCode::OsUnsupported,
            format!("Unsupported OS '{}'", os),
            details,
        )
    }

    pub fn ssh_identity_file_not_found(
        host: impl Into<String>,
        identity_file: impl Into<String>,
    ) -> Self {
        let details = Self::details_of(SshIdentityFileNotFoundDetails {
            host: host.into(),
            identity_file: identity_file.into(),
        });

        Self::new(
            ErrorCode::SshIdentityFileNotFound,
            "SSH identity file not found",
            details,
        )
    }

    pub fn ssh_connect_failed(host: impl Into<String>, exit_code: i32, stderr: impl Into<String>) -> Self {
        let host = host.into();
        let details = Self::details_of(SshConnectFailedDetails {
            host: host.clone(),
            exit_code,
            stderr: stderr.into(),
        });

        let mut err = Self::new(
            ErrorCode::SshConnectFailed,
            format!("Unable to connect to {}", host),
            details,
        );
        err.retryable = Some(true);
        err
    }

    pub fn deploy_no_sessions(sites: Vec<String>) -> Self {
        Self::new(
            ErrorCode::DeployNoSessions,
            "No reachable servers for the requested sites",
            serde_json::json!({ "sites": sites }),
        )
        .with_hint("Add servers to the site or check network access to them")
    }

    pub fn deploy_build_failed(
        command: impl Into<String>,
        exit_code: i32,
        build_location: impl Into<String>,
    ) -> Self {
        let details = Self::details_of(BuildFailedDetails {
            command: command.into(),
            exit_code,
            build_location: build_location.into(),
        });

        Self::new(
            ErrorCode::DeployBuildFailed,
            "Build error. Please check the console log output.",
            details,
        )
    }

    pub fn deploy_archive_failed(
        bundle_path: impl Into<String>,
        build_location: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let details = Self::details_of(ArchiveFailedDetails {
            bundle_path: bundle_path.into(),
            build_location: build_location.into(),
            error: error.into(),
        });

        Self::new(ErrorCode::DeployArchiveFailed, "Archiving failed", details)
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let details = Self::details_of(InternalIoErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalIoError, "IO error", details)
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    pub fn with_details(mut self, key: &str, value: Value) -> Self {
        if let Value::Object(map) = &mut self.details {
            map.insert(key.to_string(), value);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_dotted() {
        assert_eq!(ErrorCode::DeployBuildFailed.as_str(), "deploy.build_failed");
        assert_eq!(ErrorCode::OsUnsupported.as_str(), "os.unsupported");
    }

    #[test]
    fn build_failed_carries_exit_code() {
        let err = Error::deploy_build_failed("meteor build", 1, "/tmp/app");
        assert_eq!(err.code, ErrorCode::DeployBuildFailed);
        assert_eq!(err.details["exitCode"], 1);
        assert!(err.to_string().contains("Build error"));
    }

    #[test]
    fn with_details_extends_object() {
        let err = Error::deploy_no_sessions(vec!["prod".to_string()])
            .with_details("hosts", serde_json::json!(["a", "b"]));
        assert_eq!(err.details["sites"][0], "prod");
        assert_eq!(err.details["hosts"][1], "b");
        assert!(!err.hints.is_empty());
    }
}
