pub mod command;
pub mod fsm;
pub mod message;
pub mod rate_limit;
pub mod renderer;
pub mod room;
pub mod session;
pub mod username;
pub mod utf8;

pub use message::{Message, MessageLog};
pub use rate_limit::{Admission, RateLimiter};
pub use renderer::Renderer;
pub use room::Room;
pub use session::{HelpLang, Mode, Session, Transport, UiState};

/// Listen port used when neither `-p` nor `PORT` override it.
pub const DEFAULT_PORT: u16 = 2222;

/// History ring capacity (`H` in the design notes).
pub const MAX_MESSAGES: usize = 100;

/// Roster capacity (`C_max`).
pub const MAX_CLIENTS: usize = 64;

pub const USERNAME_MAX_BYTES: usize = 63;
pub const MESSAGE_MAX_BYTES: usize = 1023;
pub const DISPLAY_NAME_MAX_WIDTH: usize = 20;

/// Rate-limit table size (`T`).
pub const RATE_LIMIT_TABLE_SIZE: usize = 256;
/// Rate-limit window (`W`), seconds.
pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;
/// Connections per window before blocking (`N_c`).
pub const RATE_LIMIT_MAX_CONNECTIONS: u32 = 10;
/// Auth failures before blocking (`N_a`).
pub const RATE_LIMIT_MAX_AUTH_FAILURES: u32 = 5;
/// Block duration (`D`), seconds.
pub const RATE_LIMIT_BLOCK_SECS: u64 = 300;

pub const DEFAULT_TERM_WIDTH: u32 = 80;
pub const DEFAULT_TERM_HEIGHT: u32 = 24;

/// Sender name used for join/leave notifications.
pub const SYSTEM_AUTHOR: &str = "system";
