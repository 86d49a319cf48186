//! Party Poll Engine
//!
//! Tallies single-choice, multiple-choice and ranked ballots, hides results
//! until the viewer has voted or the poll has closed, and keeps a live
//! per-viewer projection of a poll on top of an injected document store.

pub mod clock;
pub mod config;
pub mod document;
pub mod draft;
pub mod editor;
pub mod errors;
pub mod projection;
pub mod rsvp;
pub mod session;
pub mod store;
pub mod tally;
pub mod types;
pub mod visibility;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, LoggingConfig, PollConfig};
pub use draft::{PollDraft, create_poll};
pub use editor::BallotEditor;
pub use errors::{Error, Result};
pub use projection::{PollProjection, PollView};
pub use session::PollSession;
pub use store::{DocumentPath, DocumentStore, InMemoryStore};
pub use types::{Ballot, BallotPayload, Poll, PollKind, PollOption, TallyResult};
pub use visibility::{Visibility, VisibilityPolicy};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the poll engine with proper logging
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "poll=info".into()),
        )
        .init();

    tracing::info!("Poll engine v{} initialized", VERSION);
    Ok(())
}

/// Initialize logging from loaded configuration
///
/// `RUST_LOG` still wins over `logging.level` when set.
pub fn init_with(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("poll={}", logging.level).into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match logging.format.as_str() {
        "compact" => builder.compact().init(),
        _ => builder.init(),
    }

    tracing::info!(
        "Poll engine v{} initialized (level={}, format={})",
        VERSION,
        logging.level,
        logging.format
    );
    Ok(())
}
