pub mod backends;
pub mod capability;
pub mod connections;
pub mod controller;
pub mod embedding_worker;
pub mod error;
pub mod extraction;
pub mod inter;
pub mod intra;
pub mod manager;
pub mod pref_worker;
pub mod preferences;
pub mod schema;

pub use capability::{DocClient, Embedder, Extractor, KVClient, StreamEntry, VectorClient};
pub use connections::{DocManager, KvManager, VectorManager};
pub use controller::{SupervisedWorker, WorkerController, WorkerFactory};
pub use embedding_worker::EmbeddingWorker;
pub use error::MemoryError;
pub use inter::InterSessionStore;
pub use intra::IntraSessionStore;
pub use manager::MemoryManager;
pub use pref_worker::PrefWorker;
pub use preferences::{PreferenceStore, VersionedPreferences};
pub use schema::{
    ConversationDocument, JobRecord, Message, MemoryItem, MemoryType, MessageRole,
    PreferenceDocument, SessionId, UserId, VectorPoint,
};
