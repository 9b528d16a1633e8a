pub mod client;
pub mod models;

pub use client::ComputeUsageClient;
pub use models::Usage;
