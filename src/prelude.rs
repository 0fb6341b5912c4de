// Internal logging facade for the registry modules.
// `debug!`, `info!`, `warn!`, `error!` resolve to `tracing`, `log`,
// or a no-op depending on enabled features.

#[allow(unused_imports, reason = "might not be used at any given time")]
#[expect(clippy::allow_attributes, reason = "might be used at any given time")]
pub(crate) use crate::observability::{
    log_debug as debug, log_error as error, log_info as info, log_warn as warn,
};
