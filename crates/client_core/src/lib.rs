//! Client side of the thumbnail studio: reference image intake, the
//! guest/credit gate, session sync and the chat-driven generation loop.

pub mod controller;
pub mod gate;
pub mod generation;
pub mod media;
pub mod persist;
pub mod profile;
pub mod session;
pub mod youtube;

pub use controller::{AppController, ImageCache, Modal, Phase, SendOutcome, ViewState};
pub use gate::{AccessGate, DenyReason, GateDecision, GUEST_GENERATION_LIMIT};
pub use generation::{GenerationClient, GenerationError, GenerationErrorKind, ThumbnailGenerator};
pub use persist::{FileState, MemoryState, PersistError, PersistedState};
pub use profile::{ProfileClient, ProfileService};
pub use session::{AuthUser, Session, SessionSync};
pub use youtube::{SearchOrder, SearchPage, ThumbnailFetcher, VideoSummary, YoutubeSearchClient};

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
