//! Tracing subscriber setup for the Lattice binaries.
//!
//! Console output carries uptime, target and thread name so the tick,
//! network and worker threads can be told apart. Debug builds with a log
//! directory also write JSON lines to `lattice.log`.

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use lattice_config::Config;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither `RUST_LOG` nor the config names one.
pub const DEFAULT_FILTER: &str = "info";

/// Name of the JSON log file inside the log directory.
pub const LOG_FILE_NAME: &str = "lattice.log";

/// Installs the global subscriber.
///
/// The filter comes from `RUST_LOG` if set, else the config's
/// `debug.log_level`, else [`DEFAULT_FILTER`]. Calling this twice panics
/// inside `tracing-subscriber`; call it once from `main`.
pub fn init_logging(log_dir: Option<&Path>, debug_build: bool, config: Option<&Config>) {
    let directive = filter_directive(config);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directive));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    let file = match log_dir {
        Some(dir) if debug_build => match open_log_file(dir) {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!("file logging disabled, cannot open {}: {e}", dir.display());
                None
            }
        },
        _ => None,
    };

    match file {
        Some(file) => subscriber.with(json_layer(file)).init(),
        None => subscriber.init(),
    }
}

/// The filter directive a config asks for, falling back to [`DEFAULT_FILTER`].
pub fn filter_directive(config: Option<&Config>) -> String {
    config
        .map(|c| c.debug.log_level.trim())
        .filter(|level| !level.is_empty())
        .unwrap_or(DEFAULT_FILTER)
        .to_string()
}

/// Creates the log directory and truncates `lattice.log` inside it.
pub fn open_log_file(log_dir: &Path) -> std::io::Result<File> {
    std::fs::create_dir_all(log_dir)?;
    File::create(log_dir.join(LOG_FILE_NAME))
}

fn json_layer<S>(file: File) -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true)
        .with_timer(fmt::time::uptime())
        .json()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(filter_directive(None), "info");
        let mut config = Config::default();
        config.debug.log_level = "  ".to_string();
        assert_eq!(filter_directive(Some(&config)), "info");
    }

    #[test]
    fn test_config_directive_wins_over_default() {
        let mut config = Config::default();
        config.debug.log_level = "warn,lattice_net=debug".to_string();
        assert_eq!(filter_directive(Some(&config)), "warn,lattice_net=debug");
    }

    #[test]
    fn test_subsystem_filters_parse() {
        for directive in [
            "info",
            "debug,lattice_server=trace",
            "warn,lattice_net=debug,lattice_tasks=trace",
        ] {
            assert!(EnvFilter::try_new(directive).is_ok(), "{directive}");
        }
    }

    #[test]
    fn test_json_file_layer_writes_structured_lines() {
        let dir = tempfile::tempdir().unwrap();
        let file = open_log_file(&dir.path().join("logs")).unwrap();

        let subscriber = tracing_subscriber::registry()
            .with(EnvFilter::new("debug"))
            .with(json_layer(file));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(player_id = 7, "player joined");
            tracing::trace!("filtered out");
        });

        let contents = std::fs::read_to_string(dir.path().join("logs").join(LOG_FILE_NAME)).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["level"], "INFO");
        assert_eq!(lines[0]["fields"]["message"], "player joined");
        assert_eq!(lines[0]["fields"]["player_id"], 7);
    }
}
