//! Errors raised while bootstrapping storage and locating configuration

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The folder holding the database could not be created
    #[error("Cannot create database folder {}: {source}", path.display())]
    DatabaseFolder {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Neither the user nor the system configuration file exists
    #[error("No configuration file found")]
    NoConfigFile,
}
