pub mod dialogue;
pub mod memory_storage;
pub mod storage;
pub mod telegram;

pub use dialogue::Dialogue;
pub use memory_storage::MemoryStorage;
pub use storage::Storage;
pub use telegram::TelegramClient;
