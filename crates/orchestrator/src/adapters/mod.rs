mod command;

pub use command::CommandAdapter;
