use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::types::{CompletionClaim, NewTask, Task, TaskId, TaskStatus};
use crate::application::error::{LedgerError, LedgerResult};
use crate::application::ledger::types::UserId;
use crate::infrastructure::database::LedgerStore;

/// Summary of a task deletion.
#[derive(Clone, Debug, PartialEq)]
pub struct DeletedTask {
    pub task: Task,
    pub dropped_proofs: usize,
}

pub struct TaskRegistry {
    store: Arc<dyn LedgerStore>,
}

impl TaskRegistry {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn create_task(&self, new_task: NewTask, now: DateTime<Utc>) -> LedgerResult<TaskId> {
        let description = new_task.description.trim().to_string();
        if description.is_empty() {
            return Err(LedgerError::InvalidInput(
                "task description cannot be empty".to_string(),
            ));
        }
        if new_task.reward.min > new_task.reward.max {
            return Err(LedgerError::InvalidInput(
                "reward minimum exceeds maximum".to_string(),
            ));
        }
        if new_task.max_performers == Some(0) {
            return Err(LedgerError::InvalidInput(
                "performer cap must be positive".to_string(),
            ));
        }
        let id = match new_task.id {
            Some(0) => {
                return Err(LedgerError::InvalidInput(
                    "task number must be positive".to_string(),
                ));
            }
            Some(id) => id,
            None => self.store.next_task_id().await?,
        };

        let task = Task {
            id,
            description,
            image: new_task.image,
            reward: new_task.reward,
            max_performers: new_task.max_performers,
            performers: 0,
            status: TaskStatus::Active,
            created_at: now,
        };
        if !self.store.insert_task_if_absent(&task).await? {
            return Err(LedgerError::AlreadyExists(format!("task {}", id)));
        }
        log::info!(
            "task created id={} reward={} cap={:?} image={}",
            id,
            task.reward,
            task.max_performers,
            task.image.is_some()
        );
        Ok(id)
    }

    pub async fn get_task(&self, task_id: TaskId) -> LedgerResult<Option<Task>> {
        self.store.get_task(task_id).await
    }

    pub async fn require_task(&self, task_id: TaskId) -> LedgerResult<Task> {
        self.get_task(task_id)
            .await?
            .ok_or_else(|| LedgerError::task_not_found(task_id))
    }

    pub async fn list_active(&self) -> LedgerResult<Vec<Task>> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(Task::is_active)
            .collect())
    }

    pub async fn list_all(&self) -> LedgerResult<Vec<Task>> {
        self.store.list_tasks().await
    }

    /// Removes the task and any unresolved proofs for it. Completion history stays.
    pub async fn delete_task(&self, task_id: TaskId) -> LedgerResult<DeletedTask> {
        let task = self.require_task(task_id).await?;
        self.store.delete_task(task_id).await?;

        let mut dropped_proofs = 0;
        for proof in self.store.list_proofs().await? {
            if proof.task_id != task_id || proof.status.is_terminal() {
                continue;
            }
            match self
                .store
                .transition_proof(
                    proof.id,
                    crate::application::approvals::types::ReviewStatus::Rejected,
                    Utc::now(),
                )
                .await
            {
                Ok(_) | Err(LedgerError::AlreadyResolved(_)) => {}
                Err(err) => return Err(err),
            }
            self.store
                .clear_pending_proof(proof.user_id, proof.task_id)
                .await?;
            dropped_proofs += 1;
        }
        log::info!(
            "task deleted id={} dropped_pending_proofs={}",
            task_id,
            dropped_proofs
        );
        Ok(DeletedTask {
            task,
            dropped_proofs,
        })
    }

    /// The sole duplicate-reward guard: one completion per (user, task).
    pub async fn record_completion(
        &self,
        user_id: UserId,
        task_id: TaskId,
        at: DateTime<Utc>,
    ) -> LedgerResult<Task> {
        match self.store.claim_completion(user_id, task_id, at).await? {
            CompletionClaim::Recorded { closed_task } => {
                if closed_task {
                    log::info!("task {} reached its performer cap and is now closed", task_id);
                }
                self.require_task(task_id).await
            }
            CompletionClaim::Duplicate => Err(LedgerError::AlreadyCompleted { user_id, task_id }),
            CompletionClaim::CapReached => Err(LedgerError::TaskClosed(task_id)),
            CompletionClaim::MissingTask => Err(LedgerError::task_not_found(task_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ledger::types::{RewardRange, User};
    use crate::infrastructure::database::MemoryStore;

    fn new_task(id: Option<TaskId>, cap: Option<u32>) -> NewTask {
        NewTask {
            id,
            description: "Subscribe to the channel".to_string(),
            image: None,
            reward: RewardRange::new(5, 10).unwrap(),
            max_performers: cap,
        }
    }

    async fn setup() -> (Arc<MemoryStore>, TaskRegistry) {
        let store = Arc::new(MemoryStore::new());
        for id in 1..=3 {
            store
                .insert_user_if_absent(&User::new(id, None, Utc::now()))
                .await
                .unwrap();
        }
        let registry = TaskRegistry::new(store.clone());
        (store, registry)
    }

    #[tokio::test]
    async fn create_task_validates_and_rejects_taken_ids() {
        let (_, registry) = setup().await;
        let now = Utc::now();
        assert_eq!(registry.create_task(new_task(Some(4), None), now).await.unwrap(), 4);
        assert!(matches!(
            registry.create_task(new_task(Some(4), None), now).await,
            Err(LedgerError::AlreadyExists(_))
        ));
        let mut empty = new_task(None, None);
        empty.description = "   ".to_string();
        assert!(matches!(
            registry.create_task(empty, now).await,
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(matches!(
            registry.create_task(new_task(None, Some(0)), now).await,
            Err(LedgerError::InvalidInput(_))
        ));
        assert_eq!(registry.create_task(new_task(None, None), now).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn completion_is_recorded_once_and_cap_closes_task() {
        let (_, registry) = setup().await;
        let now = Utc::now();
        let id = registry.create_task(new_task(None, Some(1)), now).await.unwrap();

        registry.record_completion(1, id, now).await.unwrap();
        assert!(matches!(
            registry.record_completion(1, id, now).await,
            Err(LedgerError::AlreadyCompleted { .. })
        ));
        assert!(matches!(
            registry.record_completion(2, id, now).await,
            Err(LedgerError::TaskClosed(_))
        ));
        assert!(registry.list_active().await.unwrap().is_empty());
        assert_eq!(registry.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_keeps_history_and_drops_pending_proofs() {
        let (store, registry) = setup().await;
        let queue = crate::application::approvals::ApprovalQueue::new(
            store.clone(),
            Arc::new(crate::application::ledger::LedgerEngine::new(
                store.clone(),
                Default::default(),
            )),
            Arc::new(TaskRegistry::new(store.clone())),
        );
        let now = Utc::now();
        let id = registry.create_task(new_task(None, None), now).await.unwrap();
        registry.record_completion(1, id, now).await.unwrap();
        let proof = queue.submit_proof(2, id, "photo".to_string(), now).await.unwrap();

        let snapshot = registry.get_task(id).await.unwrap().unwrap();
        let deleted = registry.delete_task(id).await.unwrap();
        assert_eq!(
            deleted,
            DeletedTask {
                task: snapshot,
                dropped_proofs: 1
            }
        );
        assert!(registry.get_task(id).await.unwrap().is_none());
        assert!(store.get_user(1).await.unwrap().unwrap().completed_tasks.contains_key(&id));
        assert!(queue.pending_proofs().await.unwrap().is_empty());
        assert!(matches!(
            queue.resolve_proof(proof, crate::application::approvals::types::Decision::Approve, now).await,
            Err(LedgerError::AlreadyResolved(_))
        ));
        assert!(matches!(
            registry.delete_task(id).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn recreated_id_does_not_inherit_performers() {
        let (store, registry) = setup().await;
        let now = Utc::now();
        registry.create_task(new_task(Some(5), Some(1)), now).await.unwrap();
        registry.record_completion(1, 5, now).await.unwrap();
        registry.delete_task(5).await.unwrap();

        registry.create_task(new_task(Some(5), Some(1)), now).await.unwrap();
        let task = registry.get_task(5).await.unwrap().unwrap();
        assert_eq!(task.performers, 0);
        assert!(task.is_active());
        registry.record_completion(2, 5, now).await.unwrap();
        assert!(store.get_user(1).await.unwrap().unwrap().completed_tasks.contains_key(&5));
    }
}
