//! Command implementations for the `hugodev` binary, exposed for testing

pub mod commands;
