//! Admin and user tools for a BOINC project: installing app versions and
//! preparing/submitting Autodock job batches.

pub mod app_version;
pub mod batch;
pub mod config;
pub mod db;
pub mod descriptor;
pub mod error;
pub mod fanout;
pub mod model;
pub mod runner;
pub mod sandbox;

pub use error::SubmitError;
