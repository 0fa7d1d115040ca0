pub mod events;
pub mod objective;
pub mod projects;
pub mod sessions;
pub mod tasks;
pub mod turns;
