//! Byte filters applied while restoring paged bytes to a consumer.

use std::io::{self, Write};

/// Hooks applied to bytes leaving the page file on their way to a consumer.
///
/// `before` runs once ahead of the first byte, `each` once per byte, `after`
/// once past the last. All three may write extra framing into the sink; the
/// restore loop writes whatever `each` returns immediately after the hook
/// runs. The defaults pass bytes through untouched.
pub trait TransferFilter: Send {
    /// Runs before the first restored byte.
    fn before(&mut self, _sink: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }

    /// Transform one byte, optionally writing extra output ahead of it.
    fn each(&mut self, byte: u8, _sink: &mut dyn Write) -> io::Result<u8> {
        Ok(byte)
    }

    /// Runs after the last restored byte.
    fn after(&mut self, _sink: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }
}

/// Pass-through filter: restored bytes arrive exactly as they were paged.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityFilter;

impl TransferFilter for IdentityFilter {}

/// Wrap the restored stream in fixed prefix/suffix framing so a consumer
/// mid-stream can splice the backlog into its own protocol.
#[derive(Debug, Clone)]
pub struct FramingFilter {
    prefix: Vec<u8>,
    suffix: Vec<u8>,
}

impl FramingFilter {
    pub fn new(prefix: impl Into<Vec<u8>>, suffix: impl Into<Vec<u8>>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }
}

impl TransferFilter for FramingFilter {
    fn before(&mut self, sink: &mut dyn Write) -> io::Result<()> {
        sink.write_all(&self.prefix)
    }

    fn after(&mut self, sink: &mut dyn Write) -> io::Result<()> {
        sink.write_all(&self.suffix)
    }
}
