pub mod client;
pub mod handler;
pub mod types;
pub mod updates;

pub use client::TelegramClient;
pub use handler::ChatHandler;
pub use updates::run_update_loop;
