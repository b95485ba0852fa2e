pub mod connection;
pub mod dispatcher;
