//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `forumsub` application.
//!
//! It centralizes the crate error type and the logging bootstrap so every
//! other module reports failures and events the same way.

pub mod error;
pub mod logging;

#[cfg(test)]
mod tests {
    use super::logging;

    #[test]
    fn logging_init_accepts_levels() {
        // Should not panic
        logging::init("info");
        logging::init("debug");
        logging::init("warn");
        logging::init("not-a-level");
    }
}
