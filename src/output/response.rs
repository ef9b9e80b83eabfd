//! CLI response formatting and output.
//!
//! Provides JSON envelope, printing, and exit code mapping.

use serde::Serialize;
use sitedeploy::error::Hint;
use sitedeploy::{Error, ErrorCode, Result};

#[derive(Debug, Serialize)]
pub struct CliResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CliError>,
}

#[derive(Debug, Serialize)]
pub struct CliError {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hints: Option<Vec<Hint>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl<T: Serialize> CliResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::internal_unexpected(format!("serialize response: {}", e)))
    }
}

impl CliResponse<()> {
    pub fn from_error(err: &Error) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(CliError {
                code: err.code.as_str().to_string(),
                message: err.message.clone(),
                details: err.details.clone(),
                hints: if err.hints.is_empty() {
                    None
                } else {
                    Some(err.hints.clone())
                },
                retryable: err.retryable,
            }),
        }
    }
}

fn print_response<T: Serialize>(response: &CliResponse<T>) -> Result<()> {
    use std::io::{self, Write};

    let payload = response.to_json()?;
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if let Err(e) = writeln!(handle, "{}", payload) {
        if e.kind() == io::ErrorKind::BrokenPipe {
            return Ok(()); // Exit gracefully on SIGPIPE
        }
        return Err(Error::internal_io(e.to_string(), Some("write stdout".to_string())));
    }
    Ok(())
}

pub fn map_cmd_result_to_json<T: Serialize>(result: Result<(T, i32)>) -> (Result<serde_json::Value>, i32) {
    match result {
        Ok((data, exit_code)) => match serde_json::to_value(data) {
            Ok(value) => (Ok(value), exit_code),
            Err(err) => (
                Err(Error::internal_unexpected(format!("serialize response: {}", err))),
                1,
            ),
        },
        Err(err) => {
            let exit_code = exit_code_for_error(err.code);
            (Err(err), exit_code)
        }
    }
}

fn exit_code_for_error(code: ErrorCode) -> i32 {
    match code {
        ErrorCode::ConfigInvalidJson
        | ErrorCode::ConfigInvalidValue
        | ErrorCode::ValidationInvalidArgument
        | ErrorCode::OsUnsupported => 2,

        ErrorCode::SiteNotFound => 4,

        ErrorCode::SshIdentityFileNotFound | ErrorCode::SshConnectFailed => 10,

        ErrorCode::DeployNoSessions => 20,

        ErrorCode::DeployBuildFailed | ErrorCode::DeployArchiveFailed => 30,

        ErrorCode::InternalIoError | ErrorCode::InternalUnexpected => 1,
    }
}

pub fn print_json_result(result: Result<serde_json::Value>) -> Result<()> {
    match result {
        Ok(data) => print_response(&CliResponse::success(data)),
        Err(err) => print_response(&CliResponse::<()>::from_error(&err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_map_to_exit_codes() {
        let (result, code) = map_cmd_result_to_json::<()>(Err(Error::deploy_build_failed("meteor build", 1, "/tmp/b")));
        assert!(result.is_err());
        assert_eq!(code, 30);

        let (_, code) = map_cmd_result_to_json::<()>(Err(Error::site_not_found("qa", vec!["prod".to_string()])));
        assert_eq!(code, 4);
    }

    #[test]
    fn partial_failure_keeps_command_exit_code() {
        let (result, code) = map_cmd_result_to_json(Ok((serde_json::json!({ "hasErrors": true }), 1)));
        assert_eq!(result.unwrap()["hasErrors"], true);
        assert_eq!(code, 1);
    }

    #[test]
    fn error_envelope_carries_code_and_hints() {
        let response = CliResponse::<()>::from_error(&Error::deploy_no_sessions(vec!["prod".to_string()]));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "deploy.no_sessions");
        assert!(json["error"]["hints"].as_array().is_some());
        assert!(json.get("data").is_none());
    }
}
