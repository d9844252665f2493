//! Fully wired executor over an in-memory database and a `FakeQueue`

use nbflow::queue::{QueueBackend, QueueDispatcher};
use nbflow::services::{ExecutionReporter, HistoryRecorder, NotificationDispatcher};
use nbflow::{Database, SchedulerExecutor};
use std::sync::Arc;

use super::fake_queue::FakeQueue;
use super::recording::RecordingSender;
use super::test_data::channels;
use super::test_database::TestDatabase;

pub struct TestHarness {
    pub db: TestDatabase,
    pub queue: Arc<FakeQueue>,
    pub sender: Arc<RecordingSender>,
    pub executor: SchedulerExecutor,
}

impl TestHarness {
    pub async fn new() -> Self {
        let db = TestDatabase::new()
            .await
            .expect("Failed to create test database");
        let queue = FakeQueue::new("test");
        let sender = RecordingSender::new(&[channels::SLACK, channels::DISCORD]);

        let executor = build_executor(db.database(), queue.clone(), sender.clone());
        Self {
            db,
            queue,
            sender,
            executor,
        }
    }

    pub fn database(&self) -> Arc<Database> {
        self.db.database()
    }
}

pub fn build_executor(
    database: Arc<Database>,
    backend: Arc<dyn QueueBackend>,
    sender: Arc<RecordingSender>,
) -> SchedulerExecutor {
    let recorder = Arc::new(HistoryRecorder::new(database.clone()));
    let reporter = ExecutionReporter::new(recorder.clone(), NotificationDispatcher::new(sender));
    SchedulerExecutor::new(database, QueueDispatcher::new(backend), recorder, reporter)
}
