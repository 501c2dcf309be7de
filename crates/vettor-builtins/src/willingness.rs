use async_trait::async_trait;
use std::collections::HashMap;
use vettor_agents::{Agent, Capability};
use vettor_core::{
    AgentContext, AgentRequest, AgentResponse, AgentType, VettorResult,
};

/// Buyer-signal keywords and their adjustment to willingness to pay.
const BUYER_TABLE: &[(&str, f64, &str)] = &[
    ("enterprise", 12.0, "enterprise buyers budget for tooling"),
    ("business", 8.0, "business buyers pay for solved problems"),
    ("developer", 6.0, "developers pay for leverage, grudgingly"),
    ("consumer", -6.0, "consumer willingness to pay is thin"),
    ("free", -15.0, "a free anchor suppresses willingness to pay"),
    ("student", -10.0, "student budgets are tight"),
];

/// Estimates willingness to pay from upstream scores and buyer signals.
pub struct WillingnessToPayAgent;

impl WillingnessToPayAgent {
    /// Creates the agent.
    pub fn new() -> Self {
        Self
    }
}

impl Default for WillingnessToPayAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for WillingnessToPayAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::WillingnessToPay
    }

    fn capabilities(&self) -> Capability {
        Capability::new("willingness-to-pay", "1.0.0")
            .with_dependencies(vec![AgentType::MarketSizing, AgentType::Pricing])
            .with_provides(vec!["willingness-to-pay-estimate".to_string()])
            .with_requires(vec![
                "business-idea".to_string(),
                "market-size-estimate".to_string(),
                "price-recommendation".to_string(),
            ])
    }

    async fn execute(
        &self,
        request: &AgentRequest,
        ctx: &AgentContext,
    ) -> VettorResult<AgentResponse> {
        let text = format!(
            "{} {}",
            request.business_idea.title, request.business_idea.description
        )
        .to_lowercase();

        let market = ctx
            .prior_scores
            .get(&AgentType::MarketSizing)
            .copied()
            .unwrap_or(50.0);
        let pricing = ctx
            .prior_scores
            .get(&AgentType::Pricing)
            .copied()
            .unwrap_or(50.0);

        let mut score = 0.5 * pricing + 0.3 * market + 0.2 * 50.0;
        let mut insights: Vec<String> = Vec::new();
        for (keyword, adjustment, insight) in BUYER_TABLE {
            if text.contains(keyword) {
                score += adjustment;
                insights.push((*insight).to_string());
            }
        }
        score = score.clamp(5.0, 95.0);

        if insights.is_empty() {
            insights.push("no strong buyer signals; leaning on upstream scores".to_string());
        }

        Ok(AgentResponse {
            agent_type: AgentType::WillingnessToPay,
            score,
            insights,
            confidence: 0.7,
            metadata: HashMap::from([
                ("market_input".to_string(), serde_json::json!(market)),
                ("pricing_input".to_string(), serde_json::json!(pricing)),
            ]),
            raw_data: serde_json::Value::Null,
        })
    }
}
