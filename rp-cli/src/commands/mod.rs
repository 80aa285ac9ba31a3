pub mod migrate;
pub mod users;
