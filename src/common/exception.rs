use thiserror::Error;

/// Errors surfaced by the write-ahead log subsystem.
///
/// Conflicts and capacity conditions are handled locally (boolean returns and
/// transparent block/segment allocation); only the I/O-facing surface uses a
/// typed error. A failed log write is terminal for the serializer subsystem:
/// the disk writer stops firing commit callbacks and affected transactions
/// stay un-deallocatable.
#[derive(Error, Debug)]
pub enum LogError {
    #[error("log I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected end of log file at offset {0}")]
    UnexpectedEof(u64),
    #[error("unknown log record type {0}")]
    UnknownRecordType(u8),
    #[error("malformed log record at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },
}
