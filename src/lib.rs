pub mod agent;
pub mod api;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod routing;
pub mod state;
pub mod stream;
pub mod tools;
pub mod transport;

mod util;
