//! Conveyor CLI: runs a queue-connected worker topology to completion.

use std::process::ExitCode;

use conveyor::{Application, builtin_registry};

fn main() -> ExitCode {
    Application::run(builtin_registry())
}
