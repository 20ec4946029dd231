pub mod alerts;
pub mod init;
pub mod probe;
pub mod reconcile;
pub mod render;
pub mod rules;
