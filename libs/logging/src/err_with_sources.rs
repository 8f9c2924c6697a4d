use core::fmt;
use std::error::Error;

/// Returns a [`fmt::Display`] adapter that prints the error and all its sources.
pub fn err_with_src<'a>(e: &'a (dyn Error + 'static)) -> ErrorWithSources<'a> {
    ErrorWithSources { e }
}

pub struct ErrorWithSources<'a> {
    e: &'a (dyn Error + 'static),
}

impl fmt::Display for ErrorWithSources<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.e)?;

        for cause in anyhow::Chain::new(self.e).skip(1) {
            write!(f, ": {cause}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prints_errors_with_sources() {
        let error = OpenFailed(ControlFailed(DriverGone));

        let display = err_with_src(&error);

        assert_eq!(
            display.to_string(),
            "Failed to open interface: Device control failed: driver went away"
        );
    }

    #[test]
    fn prints_single_error_without_separator() {
        let display = err_with_src(&DriverGone);

        assert_eq!(display.to_string(), "driver went away");
    }

    #[derive(thiserror::Error, Debug)]
    #[error("driver went away")]
    struct DriverGone;

    #[derive(thiserror::Error, Debug)]
    #[error("Device control failed")]
    struct ControlFailed(#[source] DriverGone);

    #[derive(thiserror::Error, Debug)]
    #[error("Failed to open interface")]
    struct OpenFailed(#[source] ControlFailed);
}
