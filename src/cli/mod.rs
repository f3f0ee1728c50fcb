pub mod events;
pub mod init_db;
pub mod resolve;
pub mod run;
pub mod user;
