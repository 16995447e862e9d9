//! Cache database setup

pub mod init;

pub use init::*;
