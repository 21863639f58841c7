//! Write-combining pipeline
//!
//! Commands are appended to a batch bounded by the transport's maximum
//! transfer size. A command that would make the batch reach the bound causes
//! the existing batch to be flushed first, so commands are never split
//! across transfers. Every flush is a blocking duplex exchange that
//! completes, and has its replies decoded, before the next batch starts.

use crate::codec::{decode_cycles, BitWriter, Command, Opcode, Reply};
use crate::error::{Error, Result};
use crate::transport::Transport;
use std::collections::VecDeque;

/// A run of identical reply-producing commands inside the current batch
#[derive(Debug, Clone, Copy)]
struct ReplyRun {
    opcode: Opcode,
    /// Byte offset of the first command in the batch
    offset: usize,
    count: usize,
}

/// Batching command writer that owns the transport
pub struct Pipeline<T> {
    transport: T,
    batch: BitWriter,
    runs: Vec<ReplyRun>,
    replies: VecDeque<Reply>,
    max_len: usize,
    flushes: u64,
}

impl<T: Transport> Pipeline<T> {
    /// Wrap a transport
    pub fn new(transport: T) -> Self {
        let max_len = transport.max_transfer_len();
        Self {
            transport,
            batch: BitWriter::with_capacity(max_len),
            runs: Vec::new(),
            replies: VecDeque::new(),
            max_len,
            flushes: 0,
        }
    }

    /// Append a command, flushing the current batch first if it would fill up
    pub fn write(&mut self, cmd: &Command) -> Result<&mut Self> {
        let spec = cmd.opcode().spec();
        let len = spec.encoded_len();
        if len >= self.max_len {
            return Err(Error::TransferTooLarge {
                len,
                max: self.max_len,
            });
        }
        if self.batch.len_bytes() + len >= self.max_len {
            self.flush()?;
        }

        let offset = self.batch.len_bytes();
        cmd.encode(&mut self.batch);

        if spec.out_bits > 0 {
            let stride = spec.encoded_len();
            match self.runs.last_mut() {
                Some(run) if run.opcode == cmd.opcode() && run.offset + run.count * stride == offset => {
                    run.count += 1;
                }
                _ => self.runs.push(ReplyRun {
                    opcode: cmd.opcode(),
                    offset,
                    count: 1,
                }),
            }
        }
        Ok(self)
    }

    /// Send the buffered batch and queue its decoded replies
    ///
    /// Does nothing if the batch is empty. The batch is discarded even if the
    /// transfer fails.
    pub fn flush(&mut self) -> Result<&mut Self> {
        if self.batch.is_empty() {
            return Ok(self);
        }
        let batch = std::mem::replace(&mut self.batch, BitWriter::with_capacity(self.max_len));
        let runs = std::mem::take(&mut self.runs);
        let bytes = batch.as_bytes();

        log::trace!(
            "flush #{}: {} bytes, {} reply runs",
            self.flushes,
            bytes.len(),
            runs.len()
        );
        let reply = self.transport.write_then_read(bytes)?;
        crate::transport::check_reply_len(bytes.len(), reply.len())?;
        self.flushes += 1;

        for run in runs {
            let decoded = decode_cycles(run.opcode, &reply[run.offset..], run.count)?;
            self.replies.extend(decoded);
        }
        Ok(self)
    }

    /// Flush, then send one command with `write_only`
    ///
    /// Used for fire-and-forget commands such as powering down.
    pub fn send_now(&mut self, cmd: &Command) -> Result<()> {
        self.flush()?;
        self.transport.write_only(&cmd.to_bytes())
    }

    /// Flush, then block the host for `us` microseconds
    pub fn sleep_us(&mut self, us: u32) -> Result<()> {
        self.flush()?;
        self.transport.delay_us(us);
        Ok(())
    }

    /// Pop the oldest decoded reply
    pub fn next_reply(&mut self) -> Result<Reply> {
        self.replies
            .pop_front()
            .ok_or_else(|| Error::ProtocolDecode("expected a reply, none pending".into()))
    }

    /// Drain all decoded replies
    pub fn take_replies(&mut self) -> Vec<Reply> {
        self.replies.drain(..).collect()
    }

    /// Drain exactly `count` decoded replies
    ///
    /// Fails without consuming anything if a different number is pending,
    /// so a stale reply from an earlier batch is never mistaken for data.
    pub fn take_exact(&mut self, count: usize) -> Result<Vec<Reply>> {
        if self.replies.len() != count {
            return Err(Error::ProtocolDecode(format!(
                "expected {} replies, {} pending",
                count,
                self.replies.len()
            )));
        }
        Ok(self.take_replies())
    }

    /// Number of decoded replies waiting to be taken
    pub fn pending_replies(&self) -> usize {
        self.replies.len()
    }

    /// Number of bytes buffered in the current batch
    pub fn buffered_len(&self) -> usize {
        self.batch.len_bytes()
    }

    /// Maximum batch size inherited from the transport
    pub fn max_transfer_len(&self) -> usize {
        self.max_len
    }

    /// Number of completed flushes
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    /// Borrow the transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Unwrap the transport, dropping any unsent batch
    pub fn into_inner(self) -> T {
        self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BusState;
    use crate::transport::mock::RecordingTransport;

    #[test]
    fn test_flush_empty_is_noop() {
        let mut pipe = Pipeline::new(RecordingTransport::new());
        pipe.flush().unwrap();
        assert_eq!(pipe.flush_count(), 0);
        assert!(pipe.transport().batches.is_empty());
    }

    #[test]
    fn test_write_is_chainable() {
        let mut pipe = Pipeline::new(RecordingTransport::new());
        pipe.write(&Command::Delay(5))
            .unwrap()
            .write(&Command::GbaAddrAdvance(1))
            .unwrap()
            .flush()
            .unwrap();
        assert_eq!(
            pipe.transport().batches,
            vec![vec![Command::Delay(5), Command::GbaAddrAdvance(1)]]
        );
    }

    #[test]
    fn test_batch_bounding_flushes_once_before_overflow() {
        let mut transport = RecordingTransport::new();
        transport.max_len = 64;
        let mut pipe = Pipeline::new(transport);
        // 12 cart writes = 60 bytes; the 13th would reach 65
        let cmd = Command::CartWrite(BusState::idle(0));
        for _ in 0..12 {
            pipe.write(&cmd).unwrap();
        }
        assert_eq!(pipe.flush_count(), 0);
        assert_eq!(pipe.buffered_len(), 60);
        pipe.write(&cmd).unwrap();
        assert_eq!(pipe.flush_count(), 1);
        assert_eq!(pipe.transport().batches[0].len(), 12);
        assert_eq!(pipe.buffered_len(), 5);
    }

    #[test]
    fn test_meeting_the_bound_also_flushes() {
        let mut transport = RecordingTransport::new();
        transport.max_len = 10;
        let mut pipe = Pipeline::new(transport);
        // 5 + 5 would meet the bound exactly
        pipe.write(&Command::CartRead).unwrap();
        pipe.write(&Command::CartRead).unwrap();
        assert_eq!(pipe.flush_count(), 1);
        assert_eq!(pipe.buffered_len(), 5);
    }

    #[test]
    fn test_oversized_command_rejected() {
        let mut transport = RecordingTransport::new();
        transport.max_len = 4;
        let mut pipe = Pipeline::new(transport);
        assert!(matches!(
            pipe.write(&Command::CartRead),
            Err(Error::TransferTooLarge { len: 5, max: 4 })
        ));
    }

    #[test]
    fn test_replies_in_order_across_runs() {
        let transport = RecordingTransport::with_responder(|cmd| match *cmd {
            Command::GbRead(addr) => Some(Reply::Byte(addr as u8)),
            Command::GbaRomRead => Some(Reply::Word(0xBEEF)),
            _ => None,
        });
        let mut pipe = Pipeline::new(transport);
        pipe.write(&Command::GbRead(1)).unwrap();
        pipe.write(&Command::GbRead(2)).unwrap();
        pipe.write(&Command::Delay(1)).unwrap();
        pipe.write(&Command::GbRead(3)).unwrap();
        pipe.write(&Command::GbaRomRead).unwrap();
        pipe.flush().unwrap();
        assert_eq!(
            pipe.take_replies(),
            vec![
                Reply::Byte(1),
                Reply::Byte(2),
                Reply::Byte(3),
                Reply::Word(0xBEEF)
            ]
        );
        assert!(pipe.next_reply().is_err());
    }

    #[test]
    fn test_take_exact_rejects_stale_replies() {
        let transport = RecordingTransport::with_responder(|cmd| match *cmd {
            Command::GbRead(addr) => Some(Reply::Byte(addr as u8)),
            _ => None,
        });
        let mut pipe = Pipeline::new(transport);
        pipe.write(&Command::GbRead(7)).unwrap().flush().unwrap();
        pipe.write(&Command::GbRead(8)).unwrap().flush().unwrap();
        assert!(matches!(pipe.take_exact(1), Err(Error::ProtocolDecode(_))));
        assert_eq!(pipe.pending_replies(), 2);
        assert_eq!(pipe.take_exact(2).unwrap(), vec![Reply::Byte(7), Reply::Byte(8)]);
        assert_eq!(pipe.take_exact(0).unwrap(), vec![]);
    }

    #[test]
    fn test_failed_flush_discards_batch() {
        let mut transport = RecordingTransport::new();
        transport.fail_next = true;
        let mut pipe = Pipeline::new(transport);
        pipe.write(&Command::GbRead(0)).unwrap();
        assert!(matches!(pipe.flush(), Err(Error::Transport(_))));
        assert_eq!(pipe.buffered_len(), 0);
        pipe.flush().unwrap();
        assert_eq!(pipe.pending_replies(), 0);
    }

    #[test]
    fn test_send_now_uses_write_only() {
        let mut pipe = Pipeline::new(RecordingTransport::new());
        pipe.write(&Command::Delay(1)).unwrap();
        pipe.send_now(&Command::PowerSet {
            enable: false,
            select_5v: false,
        })
        .unwrap();
        let t = pipe.transport();
        assert_eq!(t.batches, vec![vec![Command::Delay(1)]]);
        assert_eq!(t.write_only.len(), 1);
    }
}
