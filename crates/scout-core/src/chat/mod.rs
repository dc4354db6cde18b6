//! Chat transcript and reply streaming.

mod history;
mod message;
mod session;

pub use history::{ConversationSummary, FileHistoryStore, HistoryStore, NoHistory};
pub use message::{ChatMessage, Conversation, MessageRole, CANCELLED_MARKER, DEFAULT_TITLE};
pub use session::{
    SendOptions, SendOutcome, SessionError, SessionManager, TransportPreference,
    DUPLICATE_MESSAGE,
};
