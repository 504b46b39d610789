pub mod shell;

pub use shell::{CommandChannel, CommandOutput, SshShell};
