pub mod export_job;
pub mod parts;
