#![forbid(unsafe_code)]

//! Library half of the VOD archiver: catalog pagination, the download worker
//! pool and everything the `archive_vods` binary wires together.

pub mod archive;
pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod helix;
pub mod metadata;
pub mod progress;
pub mod worker;
