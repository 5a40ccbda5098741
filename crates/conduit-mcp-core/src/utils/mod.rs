//! Shared utilities: pagination, cancellation, identifier generation.

pub mod cancellation;
pub mod identifiers;
pub mod pagination;

pub use cancellation::{CancellationManager, CancellationToken};
pub use identifiers::{
    generate_job_id, generate_notification_id, generate_session_id, generate_subscription_id,
};
pub use pagination::{decode_cursor, encode_cursor, paginate, DEFAULT_PAGE_SIZE};
