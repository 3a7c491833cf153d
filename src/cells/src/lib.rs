mod route;
mod routing_table;

pub use route::*;
pub use routing_table::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RoutingTableError {
    #[error("duplicated route entry for: {0}")]
    DuplicateRoute(String),
    #[error("route entry not found for: {0}")]
    NoSuchRoute(String),
}

pub type RoutingResult<T> = std::result::Result<T, RoutingTableError>;
