mod bootstrap;
mod commands;
mod runner;

pub(crate) use bootstrap::build_console;
