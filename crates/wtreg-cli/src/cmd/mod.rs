pub mod backup;
pub mod init;
pub mod port;
pub mod validate;
pub mod worktree;
