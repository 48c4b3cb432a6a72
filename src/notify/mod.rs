/// Notification dispatch and mail transports
pub mod dispatcher;
pub mod transport;

pub use dispatcher::{DispatchOutcome, NotificationDispatcher};
pub use transport::{LogTransport, MailMessage, MailTransport, MemoryTransport, SendmailTransport};
