pub mod api;
pub mod server;
pub mod stream;

pub use api::ApiError;
pub use server::{create_router, run_server};
