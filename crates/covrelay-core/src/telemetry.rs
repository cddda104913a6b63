//! Log setup for `covrelayd`.
//!
//! `covrelayd` calls [`init_tracing`] right after parsing its flags:
//! `--json` (`COVRELAY_LOG_JSON`) picks JSON lines over the human format
//! and `-v` lowers the default level to `debug`. The lifecycle events in
//! [`crate::obs`] carry an `event` field, which is what log pipelines
//! filter on in JSON mode.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. `RUST_LOG`, when set, replaces `level`.
///
/// Returns `false` if a subscriber was already installed, in which case
/// the existing one is kept.
pub fn init_tracing(json: bool, level: Level) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let json_layer = json.then(|| fmt::layer().with_target(false).json());
    let text_layer = (!json).then(|| fmt::layer().with_target(false));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .is_ok()
}
