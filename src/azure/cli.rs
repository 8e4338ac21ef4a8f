//! Azure CLI command execution.
//!
//! [`AzCli`] is the production [`RemoteApi`]: each request becomes one `az`
//! process whose exit status, JSON stdout and stderr are handed back as a
//! [`Response`].

use super::api::{RemoteApi, Request, Response};
use super::commands::{self, AzCommand};
use colored::Colorize;
use serde_json::Value;
use std::process::Command;

/// Refuse to buffer more than this from a single invocation.
const MAX_STDOUT_BYTES: usize = 500_000;

/// Exit status used when `az` could not be started or its output was unusable.
const LOCAL_FAILURE_STATUS: i32 = -1;

#[derive(Debug, Clone)]
pub struct AzCli {
    resource_group: String,
}

impl AzCli {
    pub fn new(resource_group: &str) -> AzCli {
        AzCli {
            resource_group: resource_group.to_string(),
        }
    }
}

impl RemoteApi for AzCli {
    fn invoke(&mut self, request: &Request) -> Response {
        match commands::build(&self.resource_group, request) {
            Ok(cmd) => run(&cmd),
            Err(e) => {
                log::error!("cannot translate {request}: {e}");
                Response::failed(LOCAL_FAILURE_STATUS, e.to_string())
            }
        }
    }
}

/// Run one `az` command and capture its result.
pub fn run(cmd: &AzCommand) -> Response {
    log::debug!("run({cmd})", cmd = cmd.redacted.on_blue());

    let mut command = Command::new(&cmd.args[0]);
    command.args(&cmd.args[1..]);

    let output = match command.output() {
        Ok(output) => output,
        Err(e) => {
            log::error!("Command execution failed: {}", e);
            return Response::failed(LOCAL_FAILURE_STATUS, format!("Failed to execute command: {e}"));
        }
    };

    let status = output.status.code().unwrap_or(LOCAL_FAILURE_STATUS);
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !output.status.success() {
        log::trace!(
            "code={status}\n┎######\nstderr=\n{stderr}\n┖######",
            stderr = stderr.red()
        );
        log::warn!(
            "{failed} to run {cmd}",
            failed = "failed".on_red(),
            cmd = cmd.redacted.on_blue()
        );
        return Response {
            status,
            body: None,
            stderr,
        };
    }

    log::debug!("Success output.stdout.len(): {}", output.stdout.len());
    if output.stdout.len() > MAX_STDOUT_BYTES {
        return Response::failed(
            LOCAL_FAILURE_STATUS,
            format!("Response too large: {} bytes for command: {cmd}", output.stdout.len()),
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Response {
        status,
        body: Some(parse_stdout(&stdout)),
        stderr,
    }
}

/// `az` prints nothing for some successful calls and JSON for the rest.
fn parse_stdout(stdout: &str) -> Value {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|e| {
        log::debug!("stdout is not JSON ({e}), keeping it as text");
        Value::String(trimmed.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_stdout_json() {
        assert_eq!(parse_stdout("{\"name\": \"hub\"}\n"), json!({"name": "hub"}));
        assert_eq!(parse_stdout("[]"), json!([]));
    }

    #[test]
    fn test_parse_stdout_empty_and_text() {
        assert_eq!(parse_stdout("  \n"), Value::Null);
        assert_eq!(parse_stdout("Done"), json!("Done"));
    }

    #[test]
    fn test_missing_binary_is_local_failure() {
        let cmd = AzCommand {
            args: vec!["definitely-not-an-az-binary-xyz".to_string(), "--version".to_string()],
            redacted: "definitely-not-an-az-binary-xyz --version".to_string(),
        };
        let response = run(&cmd);
        assert_eq!(response.status, LOCAL_FAILURE_STATUS);
        assert!(!response.is_not_found());
        assert!(response.stderr.contains("Failed to execute command"));
    }
}
