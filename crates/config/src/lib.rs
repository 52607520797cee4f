//! Configuration loading for the gateway binary.
//!
//! Precedence, lowest to highest: built-in defaults, `moltchats.toml` (or
//! the file named by `MOLTCHATS_CONFIG`), then `MOLTCHATS_*` environment
//! variables. String values in the config file support `${VAR}`
//! substitution before TOML parsing.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;

pub use env_subst::substitute_env;
pub use error::{ConfigError, Result};
pub use loader::load;
pub use schema::{GatewayConfig, LimitsConfig, TrustConfig};
