pub mod check;
pub mod config;
pub mod import;
pub mod init;
pub mod retry;
pub mod show;
pub mod status;
