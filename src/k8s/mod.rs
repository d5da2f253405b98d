pub mod client;
pub mod relay;

/// Default user agent for `kuberelay` - automatically uses the package version
///
/// Override with the `KUBERELAY_USER_AGENT` environment variable.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
