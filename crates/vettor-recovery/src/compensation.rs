use crate::handler::ErrorContext;
use async_trait::async_trait;
use vettor_core::VettorResult;

/// A best-effort remediation hook run when a matching error is handled.
///
/// Actions attached to a pattern run in ascending priority order and fail
/// independently: one action erroring never prevents the others from
/// running, and never changes the classification returned to the caller.
#[async_trait]
pub trait CompensationAction: Send + Sync {
    /// Name patterns reference this action by.
    fn name(&self) -> &str;

    /// Ascending execution order among a pattern's actions.
    fn priority(&self) -> u32 {
        100
    }

    /// Runs the remediation.
    async fn execute(&self, ctx: &ErrorContext, error_message: &str) -> VettorResult<()>;
}
