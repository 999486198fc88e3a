//! Set host facts from a task.

use async_trait::async_trait;
use tracing::debug;

use super::{Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult};

/// The `set_fact` module: records each parameter as a fact on the target
/// host.
///
/// The facts land in the returned output's data; the executor folds them
/// into the registered/set-facts variable layer (and, when `cacheable` is
/// set, into the injected fact cache). Setting a fact is not a state change
/// on the host, so the result is always `ok`.
pub struct SetFactModule;

/// Parameter names that configure the module rather than define facts.
const CONTROL_PARAMS: &[&str] = &["cacheable"];

#[async_trait]
impl Module for SetFactModule {
    fn name(&self) -> &'static str {
        "set_fact"
    }

    fn description(&self) -> &'static str {
        "Set host facts from a task"
    }

    async fn apply(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let mut output = ModuleOutput::ok("");
        let mut names = Vec::new();

        for (key, value) in params {
            if CONTROL_PARAMS.contains(&key.as_str()) {
                continue;
            }
            debug!(host = %ctx.host, fact = %key, "setting fact");
            output.data.insert(key.clone(), value.clone());
            names.push(key.clone());
        }

        output.msg = if names.len() == 1 {
            format!("set fact: {}", names[0])
        } else {
            format!("set {} facts: {}", names.len(), names.join(", "))
        };

        Ok(output)
    }

    async fn check(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        // Facts only live in run state, so check mode sets them too.
        self.apply(params, ctx).await
    }
}
