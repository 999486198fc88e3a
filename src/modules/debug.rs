//! Print a message or a variable during execution.

use async_trait::async_trait;
use tracing::info;

use super::{Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult, ParamExt};

/// The `debug` module: prints a message or the value of a variable.
///
/// Never reports a change; safe in check mode.
pub struct DebugModule;

#[async_trait]
impl Module for DebugModule {
    fn name(&self) -> &'static str {
        "debug"
    }

    fn description(&self) -> &'static str {
        "Print statements during execution"
    }

    async fn apply(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        if let Some(var) = params.get_string("var")? {
            let value = ctx.engine.resolve_key(&ctx.vars, &var)?;
            info!(host = %ctx.host, "{} = {}", var, value);
            return Ok(ModuleOutput::ok(format!("{} = {}", var, value))
                .with_data(var, value));
        }

        let msg = params
            .get_string("msg")?
            .unwrap_or_else(|| "Hello world!".to_string());
        info!(host = %ctx.host, "{}", msg);
        Ok(ModuleOutput::ok(msg))
    }

    async fn check(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        // No side effects, so check mode behaves exactly like apply.
        self.apply(params, ctx).await
    }
}
