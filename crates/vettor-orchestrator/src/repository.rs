use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;
use vettor_core::{AgentType, VettorError, VettorResult};

/// Persistence state of one agent execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    /// Execution started, outcome not recorded yet.
    Pending,
    /// Execution finished with a score.
    Completed,
    /// Execution failed terminally.
    Failed,
}

/// One persisted agent execution within an evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResultRecord {
    /// Record identifier.
    pub id: Uuid,
    /// The evaluation the execution belongs to.
    pub evaluation_id: Uuid,
    /// Which agent ran.
    pub agent_type: AgentType,
    /// Persistence state.
    pub status: ResultStatus,
    /// The request the agent received.
    pub input_data: serde_json::Value,
    /// The agent's response (or error description on failure).
    pub output_data: Option<serde_json::Value>,
    /// The agent's score, when completed.
    pub score: Option<f64>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl AgentResultRecord {
    /// A fresh pending record for an execution that is about to run.
    pub fn pending(
        evaluation_id: Uuid,
        agent_type: AgentType,
        input_data: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            evaluation_id,
            agent_type,
            status: ResultStatus::Pending,
            input_data,
            output_data: None,
            score: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Persistence seam for agent execution results.
///
/// The orchestrator writes one record per agent execution and reads them
/// back for aggregation; the storage engine behind this trait is not its
/// concern.
#[async_trait]
pub trait ResultRepository: Send + Sync {
    /// Persists a new record.
    async fn create(&self, record: AgentResultRecord) -> VettorResult<()>;

    /// Looks a record up by id.
    async fn find_by_id(&self, id: Uuid) -> VettorResult<Option<AgentResultRecord>>;

    /// All records for an evaluation, oldest first.
    async fn find_by_evaluation_id(
        &self,
        evaluation_id: Uuid,
    ) -> VettorResult<Vec<AgentResultRecord>>;

    /// Replaces an existing record; fails when the id is unknown.
    async fn update(&self, record: AgentResultRecord) -> VettorResult<()>;

    /// Deletes a record, reporting whether it existed.
    async fn delete(&self, id: Uuid) -> VettorResult<bool>;
}

/// Process-lifetime repository backed by a map; the default wiring for
/// tests and the CLI.
pub struct InMemoryResultRepository {
    records: RwLock<HashMap<Uuid, AgentResultRecord>>,
}

impl InMemoryResultRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryResultRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultRepository for InMemoryResultRepository {
    async fn create(&self, record: AgentResultRecord) -> VettorResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(VettorError::Repository(format!(
                "record {} already exists",
                record.id
            )));
        }
        records.insert(record.id, record);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> VettorResult<Option<AgentResultRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn find_by_evaluation_id(
        &self,
        evaluation_id: Uuid,
    ) -> VettorResult<Vec<AgentResultRecord>> {
        let records = self.records.read().await;
        let mut found: Vec<AgentResultRecord> = records
            .values()
            .filter(|r| r.evaluation_id == evaluation_id)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }

    async fn update(&self, mut record: AgentResultRecord) -> VettorResult<()> {
        let mut records = self.records.write().await;
        if !records.contains_key(&record.id) {
            return Err(VettorError::Repository(format!(
                "record {} does not exist",
                record.id
            )));
        }
        record.updated_at = Utc::now();
        records.insert(record.id, record);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> VettorResult<bool> {
        Ok(self.records.write().await.remove(&id).is_some())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_find() {
        let repo = InMemoryResultRepository::new();
        let evaluation_id = Uuid::new_v4();
        let record = AgentResultRecord::pending(
            evaluation_id,
            AgentType::MarketSizing,
            serde_json::json!({"idea": "x"}),
        );
        let id = record.id;
        repo.create(record).await.unwrap();

        let found = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(found.status, ResultStatus::Pending);
        assert_eq!(found.evaluation_id, evaluation_id);

        let by_eval = repo.find_by_evaluation_id(evaluation_id).await.unwrap();
        assert_eq!(by_eval.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let repo = InMemoryResultRepository::new();
        let record = AgentResultRecord::pending(
            Uuid::new_v4(),
            AgentType::Pricing,
            serde_json::Value::Null,
        );
        repo.create(record.clone()).await.unwrap();
        assert!(repo.create(record).await.is_err());
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let repo = InMemoryResultRepository::new();
        let mut record = AgentResultRecord::pending(
            Uuid::new_v4(),
            AgentType::Pricing,
            serde_json::Value::Null,
        );
        repo.create(record.clone()).await.unwrap();

        record.status = ResultStatus::Completed;
        record.score = Some(81.0);
        repo.update(record.clone()).await.unwrap();
        let found = repo.find_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(found.status, ResultStatus::Completed);
        assert_eq!(found.score, Some(81.0));

        assert!(repo.delete(record.id).await.unwrap());
        assert!(!repo.delete(record.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_unknown_record_fails() {
        let repo = InMemoryResultRepository::new();
        let record = AgentResultRecord::pending(
            Uuid::new_v4(),
            AgentType::Competition,
            serde_json::Value::Null,
        );
        assert!(repo.update(record).await.is_err());
    }
}
