mod ollama_embedder;
mod qdrant_vector;
mod redis_kv;
mod sqlite_doc;

pub use ollama_embedder::OllamaEmbedder;
pub use qdrant_vector::QdrantVectorClient;
pub use redis_kv::RedisKvClient;
pub use sqlite_doc::SqliteDocClient;
