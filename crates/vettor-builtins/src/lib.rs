//! Built-in analysis agents for business-idea evaluation.
//!
//! Four declarative, lookup-table agents that exercise the orchestration
//! substrate end-to-end: market sizing and competition run first (no
//! dependencies), pricing conditions on the market-sizing score, and
//! willingness-to-pay conditions on both. The heuristics are intentionally
//! simple keyword tables — the engine never depends on how they score.

/// Competitive-difficulty scoring.
pub mod competition;
/// Market-size estimation.
pub mod market_sizing;
/// Pricing-model recommendation.
pub mod pricing;
/// Willingness-to-pay estimation.
pub mod willingness;

pub use competition::CompetitionAgent;
pub use market_sizing::MarketSizingAgent;
pub use pricing::PricingAgent;
pub use willingness::WillingnessToPayAgent;

use std::sync::Arc;
use vettor_agents::AgentRegistry;
use vettor_core::VettorResult;

/// Registers every built-in agent with the given registry.
pub async fn register_builtins(registry: &AgentRegistry) -> VettorResult<()> {
    registry.register_agent(Arc::new(MarketSizingAgent::new())).await?;
    registry.register_agent(Arc::new(CompetitionAgent::new())).await?;
    registry.register_agent(Arc::new(PricingAgent::new())).await?;
    registry
        .register_agent(Arc::new(WillingnessToPayAgent::new()))
        .await?;
    Ok(())
}
