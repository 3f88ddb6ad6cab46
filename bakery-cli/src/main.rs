//! `bakery-shout`: uppercase a file, then add an exclamation mark.

use bakery_cli::{CliError, cli};
use bakery_core::{Transform, sequence};
use std::process::ExitCode;

fn uppercase() -> Result<Transform, CliError> {
    Ok(Transform::from_fn("uppercase", ["x"], ["y"], |inputs, outputs| {
        let text = inputs.read_to_string("x")?;
        outputs.write("y", text.to_uppercase())?;
        Ok(())
    })?)
}

fn exclaim() -> Result<Transform, CliError> {
    Ok(Transform::from_fn("exclaim", ["y"], ["z"], |inputs, outputs| {
        let text = inputs.read_to_string("y")?;
        outputs.write("z", format!("{text}!"))?;
        Ok(())
    })?)
}

fn real_main() -> Result<ExitCode, CliError> {
    let shout = sequence([uppercase()?, exclaim()?])?.named("shout");
    Ok(cli(shout)?
        .with_name("bakery-shout")
        .about("Uppercase the --x file and write it, with a trailing `!`, to --z.")
        .run())
}

fn main() -> ExitCode {
    real_main().unwrap_or_else(|err| err.report())
}
