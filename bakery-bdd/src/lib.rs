//! BDD harness (cucumber-rs).
//!
//! This crate keeps scenario tests isolated from the production crates. The
//! transforms below are the building blocks the scenarios compose.

use bakery_core::{CompositionError, Transform};

/// Reads `input`, writes it uppercased to `output`.
pub fn uppercase(input: &str, output: &str) -> Result<Transform, CompositionError> {
    let (from, to) = (input.to_string(), output.to_string());
    Transform::from_fn("uppercase", [input], [output], move |inputs, outputs| {
        outputs.write(&to, inputs.read_to_string(&from)?.to_uppercase())?;
        Ok(())
    })
}

/// Reads `input`, writes it to `output` with a trailing `!`.
pub fn exclaim(input: &str, output: &str) -> Result<Transform, CompositionError> {
    let (from, to) = (input.to_string(), output.to_string());
    Transform::from_fn("exclaim", [input], [output], move |inputs, outputs| {
        outputs.write(&to, format!("{}!", inputs.read_to_string(&from)?))?;
        Ok(())
    })
}

/// Writes half of its output, then fails.
pub fn failing(input: &str, output: &str) -> Result<Transform, CompositionError> {
    let to = output.to_string();
    Transform::from_fn("failing", [input], [output], move |_, outputs| {
        outputs.write(&to, "half")?;
        anyhow::bail!("stage failed on purpose")
    })
}
