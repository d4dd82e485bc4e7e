//! Domain model (arguments, requests, responses, statuses).
//!
//! ここは broker もワイヤ形式も知らない。
//! 変換は `protocol`、配送は `ports` / `impls` が受け持つ。

pub mod args;
pub mod errors;
pub mod request;
pub mod status;
pub mod timestamp;

pub use self::args::{ArgMap, KWArgMap};
pub use self::errors::TaskError;
pub use self::request::{Request, Response};
pub use self::status::TaskStatus;
pub use self::timestamp::{Timestamp, TimestampError};
