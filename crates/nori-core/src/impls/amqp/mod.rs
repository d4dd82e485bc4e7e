//! AMQP (lapin) による Transport と管理操作

pub mod admin;
pub mod connection;
pub mod topology;
pub mod transport;

pub use self::admin::AmqpAdmin;
pub use self::connection::{ConnectionListener, SingleConnectionFactory, redact_url};
pub use self::topology::{Binding, Destination, Exchange, ExchangeKind, Queue, to_field_table};
pub use self::transport::{AmqpTransport, LoggingListener};
