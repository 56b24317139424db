#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]
#![deny(clippy::cast_precision_loss)]
#![deny(clippy::cast_possible_truncation)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::cast_sign_loss)]
#![deny(clippy::disallowed_types)]

//! Configuration and Read API of the trust registry node.

pub mod config;
pub mod server;

pub use config::{load_config, parse_config, ConfigError, ContractConfig, NodeConfig, Overrides};
pub use server::{build_router, ApiState};
