#![allow(clippy::missing_docs_in_private_items)]

pub mod error;
pub mod llm;
pub mod notifier;
pub mod storage;
pub mod utils;
