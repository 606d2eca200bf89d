/// Background task implementations
use crate::{context::AppContext, error::RegistrarResult};

/// Drop terminal scheduled operations older than the retention window
pub fn prune_finished_operations(ctx: &AppContext) -> usize {
    ctx.registrar.prune_finished(ctx.operation_retention())
}

/// Audit every confirmed chain; returns identifiers halted by this run
pub async fn audit_operation_log(ctx: &AppContext) -> Vec<String> {
    ctx.registrar.audit().await
}

/// Health check - verify the operation journal is reachable
pub async fn health_check(ctx: &AppContext) -> RegistrarResult<()> {
    ctx.registrar.store().ping().await
}
