pub mod batch;
pub mod executor;
pub mod janitor;
pub mod settings;
pub mod staging;
