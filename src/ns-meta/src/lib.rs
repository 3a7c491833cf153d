mod dir_stream;
mod driver;
mod resolver;
mod schema;

#[cfg(test)]
mod ns_meta_tests;

pub use dir_stream::*;
pub use driver::*;
pub use resolver::*;
pub use schema::*;
