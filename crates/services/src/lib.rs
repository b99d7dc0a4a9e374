pub mod prompt_store;

pub use prompt_store::{PromptStore, PromptStoreError};
