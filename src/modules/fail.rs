//! Fail a task deliberately.

use async_trait::async_trait;

use super::{Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult, ParamExt};

/// The `fail` module: fails with a custom message.
///
/// Usually combined with a `when` guard, or placed in a rescue sequence to
/// re-raise after cleanup.
pub struct FailModule;

#[async_trait]
impl Module for FailModule {
    fn name(&self) -> &'static str {
        "fail"
    }

    fn description(&self) -> &'static str {
        "Fail with a custom message"
    }

    async fn apply(
        &self,
        params: &ModuleParams,
        _ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let msg = params
            .get_string("msg")?
            .unwrap_or_else(|| "Failed as requested from task".to_string());
        Ok(ModuleOutput::failed(msg))
    }

    async fn check(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        // A deliberate failure fires in check mode too.
        self.apply(params, ctx).await
    }
}
