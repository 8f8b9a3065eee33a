pub mod dispatcher;
pub mod parts;
pub mod sweeper;
