use async_trait::async_trait;
use std::collections::HashMap;
use vettor_agents::{Agent, Capability};
use vettor_core::{
    AgentContext, AgentRequest, AgentResponse, AgentType, VettorResult,
};

/// Pricing models with their trigger keywords and base score.
const MODEL_TABLE: &[(&str, &[&str], f64)] = &[
    ("subscription", &["subscription", "saas", "monthly", "recurring"], 62.0),
    ("take-rate", &["marketplace", "commission", "transactions"], 58.0),
    ("enterprise-license", &["enterprise", "compliance", "on-premise"], 65.0),
    ("usage-based", &["api", "usage", "pay per", "metered"], 60.0),
];

const FALLBACK_MODEL: (&str, f64) = ("one-time-purchase", 50.0);

/// Recommends a pricing model, conditioned on the market-sizing score.
pub struct PricingAgent;

impl PricingAgent {
    /// Creates the agent.
    pub fn new() -> Self {
        Self
    }
}

impl Default for PricingAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for PricingAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Pricing
    }

    fn capabilities(&self) -> Capability {
        Capability::new("pricing", "1.0.0")
            .with_dependencies(vec![AgentType::MarketSizing])
            .with_provides(vec!["price-recommendation".to_string()])
            .with_requires(vec!["business-idea".to_string(), "market-size-estimate".to_string()])
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

        let (model, base) = MODEL_TABLE
            .iter()
            .find(|(_, keywords, _)| keywords.iter().any(|k| text.contains(k)))
            .map_or(FALLBACK_MODEL, |(model, _, base)| (*model, *base));

        // A larger market leaves more pricing freedom.
        let market_score = ctx
            .prior_scores
            .get(&AgentType::MarketSizing)
            .copied()
            .unwrap_or(50.0);
        let score = (base + (market_score - 50.0) * 0.3).clamp(5.0, 95.0);

        let insights = vec![
            format!("{model} pricing fits the described motion"),
            format!("market-size score {market_score:.0} shaped the headroom estimate"),
        ];

        Ok(AgentResponse {
            agent_type: AgentType::Pricing,
            score,
            insights,
            confidence: if model == FALLBACK_MODEL.0 { 0.5 } else { 0.75 },
            metadata: HashMap::from([(
                "model".to_string(),
                serde_json::json!(model),
            )]),
            raw_data: serde_json::json!({ "model": model, "base_score": base }),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use vettor_core::BusinessIdea;

    fn request(description: &str) -> AgentRequest {
        AgentRequest {
            evaluation_id: uuid::Uuid::new_v4(),
            business_idea: BusinessIdea::new("Idea", description),
            analysis_type: AgentType::Pricing,
            correlation_id: None,
        }
    }

    fn ctx_with_market(score: f64) -> AgentContext {
        AgentContext {
            prior_scores: HashMap::from([(AgentType::MarketSizing, score)]),
            ..AgentContext::default()
        }
    }

    #[tokio::test]
    async fn test_model_selection_from_keywords() {
        let agent = PricingAgent::new();
        let response = agent
            .execute(&request("saas tool with monthly plans"), &ctx_with_market(50.0))
            .await
            .unwrap();
        assert_eq!(response.metadata["model"], serde_json::json!("subscription"));
    }

    #[tokio::test]
    async fn test_market_score_moves_pricing_score() {
        let agent = PricingAgent::new();
        let small = agent
            .execute(&request("saas tool"), &ctx_with_market(30.0))
            .await
            .unwrap();
        let large = agent
            .execute(&request("saas tool"), &ctx_with_market(90.0))
            .await
            .unwrap();
        assert!(large.score > small.score);
    }

    #[tokio::test]
    async fn test_fallback_model_without_keywords() {
        let agent = PricingAgent::new();
        let response = agent
            .execute(&request("a device for gardens"), &AgentContext::default())
            .await
            .unwrap();
        assert_eq!(
            response.metadata["model"],
            serde_json::json!("one-time-purchase")
        );
        assert!(response.confidence < 0.75);
    }
}
