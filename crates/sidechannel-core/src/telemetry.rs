//! Centralised tracing initialisation for sidechannel binaries.
//!
//! The library only emits events (see [`crate::obs`]); it never installs a
//! subscriber on its own. An embedding program, such as the `sidechannel`
//! CLI, calls [`init_tracing`] once at start-up.
//!
//! Log lines go to stderr so that stdout stays free for command output
//! (simulation summaries, rendered config).

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON log lines, one object per mailbox
///   or dispatch event, for log aggregation.
/// * `level`: verbosity for the sidechannel crates when `RUST_LOG` is not
///   set. Dependencies stay at `WARN`. Message-level
///   events (`message.accepted`, `message.deduplicated`) only show at
///   `DEBUG`; gc and dispatch summaries show at `INFO`.
///
/// `RUST_LOG` takes precedence, e.g. `RUST_LOG=sidechannel_core=debug`.
///
/// The global subscriber can be set once per process, so only the first
/// call takes effect and later calls are ignored.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json().with_writer(std::io::stderr))
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

/// Filter used when `RUST_LOG` is absent.
fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    format!("warn,sidechannel_core={level},sidechannel={level}")
}
