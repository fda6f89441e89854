pub mod handlers;
pub mod middleware;
pub mod postprocess;
pub mod routes;
pub mod wanted;

pub use routes::create_router;
