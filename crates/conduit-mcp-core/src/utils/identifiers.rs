//! Identifier generation for sessions, subscriptions, notifications, jobs.

use uuid::Uuid;

pub fn generate_session_id() -> String {
    format!("sess-{}", Uuid::new_v4())
}

pub fn generate_subscription_id() -> String {
    format!("sub-{}", Uuid::new_v4())
}

pub fn generate_notification_id() -> String {
    format!("ntf-{}", Uuid::new_v4())
}

pub fn generate_job_id() -> String {
    format!("job-{}", Uuid::new_v4())
}
