pub mod telegram;

/// A text message received from the bot platform
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Numeric id of the sender
    pub user_id: u64,
    /// Chat the reply goes back to
    pub chat_id: i64,
    /// Display name of the sender
    pub user_name: String,
    /// The message text
    pub text: String,
}
