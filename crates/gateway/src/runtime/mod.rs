//! Runtime: everything between the HTTP boundary and the store.

pub mod broadcaster;
pub mod correlator;
pub mod dedupe;
pub mod dispatcher;
pub mod inference;
pub mod intent;
pub mod session_lock;
pub mod state_machine;
pub mod watcher;
pub mod workers;

pub use broadcaster::Broadcaster;
pub use correlator::Correlator;
pub use dispatcher::Dispatcher;
pub use intent::IntentDetector;
pub use watcher::{HookActivity, TranscriptWatcher};
pub use workers::WorkerSet;
