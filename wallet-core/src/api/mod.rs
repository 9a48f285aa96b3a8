pub mod client;
pub mod remote;
pub mod types;

pub use client::ApiClient;
pub use remote::RemoteApi;
