pub mod export_job;
pub mod receive_part;
