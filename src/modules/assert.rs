//! Assert that conditions hold on a host.

use async_trait::async_trait;

use super::{Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult, ParamExt};

/// The `assert` module: evaluates one or more conditions against the host's
/// effective variables and fails if any is false.
pub struct AssertModule;

#[async_trait]
impl Module for AssertModule {
    fn name(&self) -> &'static str {
        "assert"
    }

    fn description(&self) -> &'static str {
        "Assert that given expressions are true"
    }

    async fn apply(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let conditions = params
            .get_vec_string("that")?
            .ok_or_else(|| super::ModuleError::MissingParameter("that".to_string()))?;

        for condition in &conditions {
            let holds = ctx.engine.eval_condition(condition, &ctx.vars)?;
            if !holds {
                let msg = params
                    .get_string("fail_msg")?
                    .unwrap_or_else(|| format!("assertion failed: {}", condition));
                return Ok(ModuleOutput::failed(msg));
            }
        }

        let msg = params
            .get_string("success_msg")?
            .unwrap_or_else(|| "all assertions passed".to_string());
        Ok(ModuleOutput::ok(msg))
    }

    async fn check(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        // Pure evaluation, identical in check mode.
        self.apply(params, ctx).await
    }

    fn required_params(&self) -> &[&'static str] {
        &["that"]
    }
}
