use std::process::ExitCode;

use anyhow::Result;

fn main() -> Result<ExitCode> {
    let status = dump_pickle::cli::main(std::env::args_os(), None)?;
    Ok(ExitCode::from(status))
}
