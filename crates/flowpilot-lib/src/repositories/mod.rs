// Repository Layer
// Storage ports and their bundled implementations

pub mod session_repo;

pub use session_repo::{
    InMemorySessionRepository, JsonFileSessionRepository, PersistedSessions, SessionRepository,
};
