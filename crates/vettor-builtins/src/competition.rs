use async_trait::async_trait;
use std::collections::HashMap;
use vettor_agents::{Agent, Capability};
use vettor_core::{
    AgentContext, AgentRequest, AgentResponse, AgentType, VettorResult,
};

/// Crowded-space keywords and their difficulty penalty.
const CROWDED_TABLE: &[(&str, f64, &str)] = &[
    ("social network", 25.0, "social networking is dominated by entrenched platforms"),
    ("food delivery", 20.0, "food delivery is saturated and capital-intensive"),
    ("ride sharing", 20.0, "ride sharing has strong incumbents and thin margins"),
    ("streaming", 15.0, "streaming competes with deep-pocketed incumbents"),
    ("crypto", 15.0, "crypto markets are volatile and crowded"),
    ("e-commerce", 12.0, "general e-commerce faces dominant marketplaces"),
    ("todo app", 18.0, "productivity apps are a long-tail red ocean"),
];

/// Moat keywords and their bonus.
const MOAT_TABLE: &[(&str, f64, &str)] = &[
    ("b2b", 8.0, "B2B focus narrows the competitive field"),
    ("niche", 10.0, "a niche wedge limits direct competition"),
    ("regulated", 6.0, "regulatory burden deters casual entrants"),
    ("proprietary", 8.0, "proprietary data or tech is a defensible moat"),
    ("vertical", 6.0, "vertical specialization deepens differentiation"),
];

/// Scores how contestable the idea's space is: higher means easier to win.
pub struct CompetitionAgent;

impl CompetitionAgent {
    /// Creates the agent.
    pub fn new() -> Self {
        Self
    }
}

impl Default for CompetitionAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for CompetitionAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Competition
    }

    fn capabilities(&self) -> Capability {
        Capability::new("competition", "1.0.0")
            .with_provides(vec!["competitive-difficulty".to_string()])
            .with_requires(vec!["business-idea".to_string()])
    }

    async fn execute(
        &self,
        request: &AgentRequest,
        _ctx: &AgentContext,
    ) -> VettorResult<AgentResponse> {
        let text = format!(
            "{} {}",
            request.business_idea.title, request.business_idea.description
        )
        .to_lowercase();

        let mut score = 70.0;
        let mut insights: Vec<String> = Vec::new();
        let mut matches = 0u32;

        for (keyword, penalty, insight) in CROWDED_TABLE {
            if text.contains(keyword) {
                score -= penalty;
                insights.push((*insight).to_string());
                matches += 1;
            }
        }
        for (keyword, bonus, insight) in MOAT_TABLE {
            if text.contains(keyword) {
                score += bonus;
                insights.push((*insight).to_string());
                matches += 1;
            }
        }
        score = score.clamp(5.0, 95.0);

        if insights.is_empty() {
            insights.push("no strong competitive signals either way".to_string());
        }

        Ok(AgentResponse {
            agent_type: AgentType::Competition,
            score,
            insights,
            confidence: (0.45 + 0.1 * f64::from(matches)).min(0.85),
            metadata: HashMap::new(),
            raw_data: serde_json::Value::Null,
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
            analysis_type: AgentType::Competition,
            correlation_id: None,
        }
    }

    #[tokio::test]
    async fn test_crowded_space_scores_lower_than_moat() {
        let agent = CompetitionAgent::new();
        let crowded = agent
            .execute(&request("a new social network for everyone"), &AgentContext::default())
            .await
            .unwrap();
        let moated = agent
            .execute(
                &request("b2b niche tool with proprietary data"),
                &AgentContext::default(),
            )
            .await
            .unwrap();
        assert!(moated.score > crowded.score);
        assert!(!crowded.insights.is_empty());
    }
}
