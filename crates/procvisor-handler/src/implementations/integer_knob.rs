//! Integer scalars such as `/proc/sys/kernel/panic`.
//!
//! The host value seeds each container's copy on first read; afterwards the
//! container sees only what it wrote. Writes stay container-local unless the
//! handler is write-through.

use std::sync::Arc;

use procvisor_common::error::{ProcvisorError, Result};
use procvisor_common::types::{NodeAttr, Ownership};
use procvisor_core::sysio::IoNode;

use crate::context::HandlerContext;
use crate::handler::{Handler, HandlerSpec};

/// Single integer knob validated against an inclusive range.
#[derive(Debug)]
pub struct IntegerKnobHandler {
    spec: HandlerSpec,
    min: i64,
    max: i64,
    ctx: Arc<HandlerContext>,
}

impl IntegerKnobHandler {
    /// Creates the handler accepting values in `min..=max`.
    #[must_use]
    pub const fn new(spec: HandlerSpec, min: i64, max: i64, ctx: Arc<HandlerContext>) -> Self {
        Self {
            spec,
            min,
            max,
            ctx,
        }
    }

    fn parse(text: &str) -> Result<i64> {
        text.trim()
            .parse()
            .map_err(|_| ProcvisorError::invalid(format!("not an integer: {text:?}")))
    }

    /// Checks `text` against the range and returns it trimmed, as stored.
    fn validate<'a>(&self, text: &'a str) -> Result<&'a str> {
        let value = Self::parse(text)?;
        if !(self.min..=self.max).contains(&value) {
            return Err(ProcvisorError::invalid(format!(
                "{value} outside [{}, {}]",
                self.min, self.max
            )));
        }
        Ok(text.trim())
    }

    /// Current value as seen by the caller's container.
    fn current(&self, node: &IoNode, pid: u32) -> Result<String> {
        let container = self.ctx.container(pid)?;
        if self.spec.cacheable {
            if let Some(value) = container.data(node.path(), node.name())? {
                return Ok(value);
            }
        }

        let line = self.ctx.io.read_line(node)?;
        // Malformed host content is reported, never coerced.
        let _ = Self::parse(&line)?;
        let value = line.trim().to_string();
        if !self.spec.cacheable {
            return Ok(value);
        }

        // A write may have landed while the host was read; it wins.
        let held = container.seed_data(node.path(), node.name(), value.as_str())?;
        tracing::debug!(
            container = %container.inode(),
            path = node.path(),
            value = %held,
            seeded = held == value,
            "seeded container value from host"
        );
        Ok(held)
    }
}

impl Handler for IntegerKnobHandler {
    fn spec(&self) -> &HandlerSpec {
        &self.spec
    }

    fn lookup(&self, node: &IoNode, pid: u32) -> Result<NodeAttr> {
        self.ctx.ensure_resolvable(pid)?;
        self.ctx.io.stat(node)
    }

    fn getattr(&self, _node: &IoNode, pid: u32) -> Result<Option<Ownership>> {
        self.ctx.ensure_resolvable(pid)?;
        Ok(None)
    }

    fn open(&self, node: &IoNode, pid: u32) -> Result<()> {
        let mode = node.access_mode();
        if (mode != libc::O_RDONLY && mode != libc::O_WRONLY)
            || node.open_flags() & libc::O_APPEND != 0
        {
            return Err(ProcvisorError::PermissionDenied {
                message: format!("unsupported open flags {:#o} on {}", node.open_flags(), node.path()),
            });
        }
        let _container = self.ctx.container(pid)?;

        // Container-local writes never touch the host, which only has to be
        // readable.
        if self.spec.write_through {
            self.ctx.io.open(node)
        } else {
            self.ctx.io.open(&node.clone().with_open_flags(libc::O_RDONLY))
        }
    }

    fn read(&self, node: &IoNode, pid: u32, size: usize, offset: u64) -> Result<Vec<u8>> {
        if offset > 0 {
            return Ok(Vec::new());
        }
        let mut content = format!("{}\n", self.current(node, pid)?).into_bytes();
        content.truncate(size);
        Ok(content)
    }

    fn write(&self, node: &IoNode, pid: u32, data: &[u8]) -> Result<usize> {
        let text = std::str::from_utf8(data)
            .map_err(|_| ProcvisorError::invalid("value is not valid UTF-8"))?;
        let value = self.validate(text)?;
        let container = self.ctx.container(pid)?;

        if self.spec.write_through {
            let _ = self.ctx.io.write(node, value.as_bytes())?;
        }
        container.set_data(node.path(), node.name(), value)?;
        tracing::debug!(
            container = %container.inode(),
            path = node.path(),
            value,
            write_through = self.spec.write_through,
            "stored container value"
        );
        Ok(data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_trailing_newline_and_sign() {
        assert_eq!(IntegerKnobHandler::parse("1\n").expect("parse"), 1);
        assert_eq!(IntegerKnobHandler::parse(" -30 ").expect("parse"), -30);
    }

    #[test]
    fn parse_rejects_non_integers() {
        assert!(IntegerKnobHandler::parse("").is_err());
        assert!(IntegerKnobHandler::parse("0x1").is_err());
        assert!(IntegerKnobHandler::parse("1 2").is_err());
    }
}
