use async_trait::async_trait;
use std::collections::HashMap;
use vettor_agents::{Agent, Capability};
use vettor_core::{
    AgentContext, AgentRequest, AgentResponse, AgentType, VettorResult,
};

/// Sector keywords with a market-size contribution and the insight shown
/// when the keyword matches.
const SECTOR_TABLE: &[(&str, f64, &str)] = &[
    ("healthcare", 22.0, "healthcare spend is large and growing"),
    ("health", 18.0, "health-adjacent markets are sizable"),
    ("finance", 20.0, "financial services carry large budgets"),
    ("fintech", 20.0, "fintech rides existing transaction volume"),
    ("ai", 18.0, "AI tooling demand is expanding quickly"),
    ("education", 14.0, "education is broad but budget-constrained"),
    ("logistics", 16.0, "logistics volume underpins steady demand"),
    ("real estate", 16.0, "real estate transactions are high-value"),
    ("enterprise", 15.0, "enterprise buyers support larger contracts"),
    ("small business", 10.0, "SMB markets are wide but fragmented"),
    ("pet", 8.0, "pet spending is resilient but niche"),
    ("gaming", 12.0, "gaming audiences are large and engaged"),
];

/// Reach keywords that widen or narrow the addressable market.
const REACH_TABLE: &[(&str, f64)] = &[
    ("global", 8.0),
    ("platform", 6.0),
    ("marketplace", 6.0),
    ("local", -8.0),
    ("hobby", -10.0),
];

/// Estimates total addressable market from sector and reach keywords.
pub struct MarketSizingAgent;

impl MarketSizingAgent {
    /// Creates the agent.
    pub fn new() -> Self {
        Self
    }
}

impl Default for MarketSizingAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for MarketSizingAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::MarketSizing
    }

    fn capabilities(&self) -> Capability {
        Capability::new("market-sizing", "1.0.0")
            .with_provides(vec!["market-size-estimate".to_string()])
            .with_requires(vec!["business-idea".to_string()])
    }

    async fn execute(
        &self,
        request: &AgentRequest,
        _ctx: &AgentContext,
    ) -> VettorResult<AgentResponse> {
        let text = format!(
            "{} {} {}",
            request.business_idea.title,
            request.business_idea.description,
            request.business_idea.target_market.as_deref().unwrap_or("")
        )
        .to_lowercase();

        let mut score = 40.0;
        let mut insights: Vec<String> = Vec::new();
        let mut matches = 0u32;

        for (keyword, contribution, insight) in SECTOR_TABLE {
            if text.contains(keyword) {
                score += contribution;
                insights.push((*insight).to_string());
                matches += 1;
            }
        }
        for (keyword, contribution) in REACH_TABLE {
            if text.contains(keyword) {
                score += contribution;
                matches += 1;
            }
        }
        score = score.clamp(5.0, 95.0);

        if insights.is_empty() {
            insights.push("no recognized sector signals; defaulting to a modest market".to_string());
        }
        let confidence = (0.4 + 0.1 * f64::from(matches)).min(0.9);

        Ok(AgentResponse {
            agent_type: AgentType::MarketSizing,
            score,
            insights,
            confidence,
            metadata: HashMap::from([(
                "keyword_matches".to_string(),
                serde_json::json!(matches),
            )]),
            raw_data: serde_json::json!({ "scored_text_len": text.len() }),
        })
    }
}
