pub mod background;
pub mod exec;

pub use background::BackgroundShellManager;
pub use exec::ShellOutcome;
pub use exec::ShellRequest;
pub use exec::run;
