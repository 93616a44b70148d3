pub mod database;
pub mod metrics;
pub mod paystack;
pub mod reconcile;
pub mod verification;

pub use database::{CommitEnrollment, CommitOutcome, Database};
pub use metrics::{get_metrics, init_metrics};
pub use paystack::PaystackClient;
