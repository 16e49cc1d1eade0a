pub mod error;
pub mod manager;
pub mod message;
pub mod providers;
pub mod source;

pub use error::{RelayError, Result};
pub use manager::RelayManager;
pub use message::{ApiResponse, SendMessage, Update};
pub use providers::{
    TelegramConfig, TelegramRelay, WebhookConfig, WebhookRelay, TELEGRAM_OFFSET_ENTRY,
};
pub use source::RelaySource;
