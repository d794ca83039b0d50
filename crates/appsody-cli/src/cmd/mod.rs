pub mod build;
pub mod deploy;
pub mod dev;
pub mod extract;
pub mod init;
pub mod list;
pub mod operator;
pub mod ps;
pub mod repo;
pub mod stack;
pub mod stop;
pub mod version;
