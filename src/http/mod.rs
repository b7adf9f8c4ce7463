//! HTTP surface: health, introspection and the relay upgrade

mod routes;

pub use routes::build_router;
