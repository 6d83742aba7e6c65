pub mod adapter;
pub mod client;
pub mod data_stream;
pub mod openai_chat;
