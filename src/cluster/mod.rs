//! The [`Cluster`] manages running and reconnecting multiple shards,
//! pacing their identifies against the gateway's shared quota and folding
//! their events into one stream.

pub mod bootstrap;
pub mod config;
pub mod error;

mod r#impl;

pub use self::{
    config::Config,
    error::{Error, Result},
    r#impl::Cluster,
};
