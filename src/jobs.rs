use crate::bulk::{self, BulkPlan, BulkReport};
use crate::db::UserRow;
use crate::service::ListingManager;
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::info;
use uuid::Uuid;

/// Background runner for bulk operations too large to answer inline.
///
/// A single worker drains the channel, so queued jobs run one after another. Finished
/// statuses are kept in memory for `retention`, then dropped.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<HashMap<Uuid, JobRecord>>>,
    retention: Duration,
}

struct Job {
    id: Uuid,
    user: UserRow,
    plan: BulkPlan,
}

struct JobRecord {
    owner: String,
    state: JobState,
    finished_at: Option<Instant>,
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed { result: BulkReport },
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub task_id: String,
    #[serde(flatten)]
    pub state: JobState,
}

#[derive(Debug, Error)]
#[error("bulk worker not available")]
pub struct QueueClosed;

impl JobQueue {
    pub fn spawn(
        listings: ListingManager,
        capacity: usize,
        retention: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        let statuses: Arc<Mutex<HashMap<Uuid, JobRecord>>> = Arc::new(Mutex::new(HashMap::new()));
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                set_state(&statuses_bg, job.id, JobState::Running).await;
                let report = bulk::run(&listings, &job.user, &job.plan).await;
                info!(
                    target = "listing.jobs",
                    task_id = %job.id,
                    successful = report.successful,
                    failed = report.failed,
                    "bulk job finished"
                );
                if let Some(record) = statuses_bg.lock().await.get_mut(&job.id) {
                    record.state = JobState::Completed { result: report };
                    record.finished_at = Some(Instant::now());
                }
            }
            info!(target = "listing.jobs", "bulk worker stopped");
        });

        (
            Self {
                tx,
                statuses,
                retention,
            },
            handle,
        )
    }

    pub async fn enqueue(&self, user: UserRow, plan: BulkPlan) -> Result<Uuid, QueueClosed> {
        let id = Uuid::new_v4();
        {
            let mut statuses = self.statuses.lock().await;
            prune(&mut statuses, self.retention);
            statuses.insert(
                id,
                JobRecord {
                    owner: user.id.clone(),
                    state: JobState::Queued,
                    finished_at: None,
                },
            );
        }
        let size = plan.len();
        if self.tx.send(Job { id, user, plan }).await.is_err() {
            self.statuses.lock().await.remove(&id);
            return Err(QueueClosed);
        }
        info!(target = "listing.jobs", task_id = %id, size, "bulk job queued");
        Ok(id)
    }

    /// Status of a task, visible only to the user who queued it. Expired results read as unknown.
    pub async fn get(&self, id: Uuid, user_id: &str) -> Option<JobInfo> {
        let mut guard = self.statuses.lock().await;
        prune(&mut guard, self.retention);
        guard
            .get(&id)
            .filter(|record| record.owner == user_id)
            .map(|record| JobInfo {
                task_id: id.to_string(),
                state: record.state.clone(),
            })
    }
}

fn prune(statuses: &mut HashMap<Uuid, JobRecord>, retention: Duration) {
    statuses.retain(|_, record| record.finished_at.is_none_or(|at| at.elapsed() < retention));
}

async fn set_state(statuses: &Mutex<HashMap<Uuid, JobRecord>>, id: Uuid, state: JobState) {
    if let Some(record) = statuses.lock().await.get_mut(&id) {
        record.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::models::{BulkOperationKind, BulkOperationRequest};
    use crate::test_support::MockMarketplace;
    use std::time::Duration;

    #[tokio::test]
    async fn queued_job_completes_and_is_owner_scoped() {
        let mock = MockMarketplace::new();
        mock.seed("a", "Lens", 20.0, 1);
        let store = Store::in_memory().await;
        let user = store.create_user("seller@example.com").await.unwrap();
        let listings = ListingManager::new(store, Arc::new(mock));
        let (queue, worker) = JobQueue::spawn(listings, 4, Duration::from_secs(60));

        let plan = BulkPlan::from_request(BulkOperationRequest {
            operation: BulkOperationKind::Relist,
            listing_ids: vec!["a".into(), "missing".into()],
            data: None,
        })
        .unwrap();
        let id = queue.enqueue(user.clone(), plan).await.unwrap();
        assert!(queue.get(id, "someone-else").await.is_none());

        let mut finished = None;
        for _ in 0..50 {
            if let Some(info) = queue.get(id, &user.id).await
                && let JobState::Completed { result } = info.state
            {
                finished = Some(result);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let report = finished.expect("job did not finish");
        assert_eq!(report.total, 2);
        assert_eq!(report.successful + report.failed, 2);

        drop(queue);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn finished_jobs_expire_after_retention() {
        let store = Store::in_memory().await;
        let user = store.create_user("seller@example.com").await.unwrap();
        let listings = ListingManager::new(store, Arc::new(MockMarketplace::new()));
        let (queue, _worker) = JobQueue::spawn(listings, 4, Duration::from_millis(30));

        let plan = BulkPlan::from_request(BulkOperationRequest {
            operation: BulkOperationKind::Delete,
            listing_ids: vec!["missing".into()],
            data: None,
        })
        .unwrap();
        let id = queue.enqueue(user.clone(), plan).await.unwrap();
        let mut completed = false;
        for _ in 0..50 {
            if let Some(info) = queue.get(id, &user.id).await
                && matches!(info.state, JobState::Completed { .. })
            {
                completed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(completed);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(queue.get(id, &user.id).await.is_none());
        assert!(queue.statuses.lock().await.is_empty());
    }
}
