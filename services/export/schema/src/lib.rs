pub mod export_job_parts;
pub mod export_jobs;
pub mod outbox_records;
pub mod processed_events;
pub mod user_profiles;
