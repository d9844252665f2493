//! This module provides reusable test utilities:
//! - Mock webhook server (Slack/Discord endpoints)
//! - In-memory test databases with a seeded project
//! - Recording runner, sink and channel sender
//! - A queue backend with injectable faults
//! - Common test data

// Allow unused code in test fixtures - each test binary uses a subset
#![allow(dead_code)]
#![allow(unused_imports)]

pub mod fake_queue;
pub mod harness;
pub mod mock_webhook;
pub mod recording;
pub mod test_data;
pub mod test_database;

// Re-export commonly used items
pub use fake_queue::FakeQueue;
pub use harness::TestHarness;
pub use mock_webhook::MockWebhookServer;
pub use recording::{RecordingRunner, RecordingSender, RecordingSink};
pub use test_data::*;
pub use test_database::TestDatabase;
