//! Execute commands on target hosts.

use async_trait::async_trait;
use tracing::debug;

use super::{Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult, ParamExt};
use crate::connection::{execute_with_retry, ExecuteOptions};

/// The `command` module: runs a command on the target host through its
/// connection.
///
/// `creates` makes the command idempotent: when the named path already
/// exists on the target, the command is not run again and the result is
/// `ok`. In check mode the command is never executed.
pub struct CommandModule;

#[async_trait]
impl Module for CommandModule {
    fn name(&self) -> &'static str {
        "command"
    }

    fn description(&self) -> &'static str {
        "Execute commands on target hosts"
    }

    async fn apply(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let cmd = params
            .get_string("cmd")?
            .or(params.get_string("_raw_params")?)
            .ok_or_else(|| ModuleError::MissingParameter("cmd".to_string()))?;

        let connection = ctx.connection.as_ref().ok_or_else(|| {
            ModuleError::ExecutionFailed(format!("no connection available for host {}", ctx.host))
        })?;

        let options = ExecuteOptions {
            cwd: params.get_string("chdir")?,
            ..Default::default()
        };

        // Idempotence guard: skip execution when the marker path exists.
        if let Some(creates) = params.get_string("creates")? {
            let probe = format!("test -e {}", shell_quote(&creates));
            let result = execute_with_retry(connection.as_ref(), &probe, &options, &ctx.retry).await?;
            if result.success() {
                return Ok(ModuleOutput::ok(format!(
                    "skipped, since {} exists",
                    creates
                )));
            }
        }

        if ctx.check_mode {
            return Ok(ModuleOutput::skipped(format!(
                "check mode: command not executed: {}",
                cmd
            )));
        }

        debug!(host = %ctx.host, %cmd, "running command");
        let result = execute_with_retry(connection.as_ref(), &cmd, &options, &ctx.retry).await?;

        let output = if result.success() {
            ModuleOutput::changed(format!("command executed: {}", cmd))
        } else {
            ModuleOutput::failed(format!("command failed with rc {}: {}", result.rc, cmd))
        };

        Ok(output.with_command_output(
            Some(result.stdout),
            Some(result.stderr),
            Some(result.rc),
        ))
    }
}

/// Minimal single-quote shell quoting.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::LocalConnection;
    use crate::modules::ModuleStatus;
    use serde_json::json;
    use std::sync::Arc;

    fn local_ctx() -> ModuleContext {
        ModuleContext::default().with_connection(Arc::new(LocalConnection::new()))
    }

    #[tokio::test]
    async fn test_command_success_is_changed() {
        let mut params = ModuleParams::new();
        params.insert("cmd".into(), json!("echo done"));

        let out = CommandModule.apply(&params, &local_ctx()).await.unwrap();
        assert_eq!(out.status, ModuleStatus::Changed);
        assert_eq!(out.rc, Some(0));
        assert_eq!(out.stdout.as_deref().map(str::trim), Some("done"));
    }

    #[tokio::test]
    async fn test_command_nonzero_rc_fails() {
        let mut params = ModuleParams::new();
        params.insert("cmd".into(), json!("exit 2"));

        let out = CommandModule.apply(&params, &local_ctx()).await.unwrap();
        assert_eq!(out.status, ModuleStatus::Failed);
        assert_eq!(out.rc, Some(2));
    }

    #[tokio::test]
    async fn test_command_creates_guard() {
        let mut params = ModuleParams::new();
        params.insert("cmd".into(), json!("echo should-not-run"));
        params.insert("creates".into(), json!("/"));

        let out = CommandModule.apply(&params, &local_ctx()).await.unwrap();
        assert_eq!(out.status, ModuleStatus::Ok);
        assert!(!out.changed);
    }

    #[tokio::test]
    async fn test_command_check_mode_skips() {
        let mut params = ModuleParams::new();
        params.insert("cmd".into(), json!("echo nope"));

        let ctx = local_ctx().with_check_mode(true);
        let out = CommandModule.check(&params, &ctx).await.unwrap();
        assert_eq!(out.status, ModuleStatus::Skipped);
    }

    #[tokio::test]
    async fn test_command_requires_cmd() {
        let err = CommandModule
            .apply(&ModuleParams::new(), &local_ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::MissingParameter(_)));
    }
}
