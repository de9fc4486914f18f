pub mod db;
pub mod log;
pub mod model;

pub use db::{DatabaseError, Result};
