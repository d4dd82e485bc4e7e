//! Protocol - Celery 互換のワイヤ形式
//!
//! 外部の producer / consumer との契約はここにある envelope だけ。
//! - **celery**: `CeleryTask` / `CeleryResult` / `CeleryExceptionResult`
//! - **codec**: envelope と `Request` / `Response` の相互変換

pub mod celery;
pub mod codec;

pub use self::celery::{CeleryExceptionResult, CeleryResult, CeleryTask};
pub use self::codec::{CodecError, JSON_CONTENT_TYPE, decode, encode, encode_to_vec};
