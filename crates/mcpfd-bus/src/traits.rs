use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use crate::command::{self, Instruction, COMMAND_LEN};
use crate::error::{BusError, Result};
use crate::regs::mask_span;

/// Callback run once an asynchronous transfer has executed.
///
/// Receives `Ok(())` when the transfer reached the device, or the error the
/// bus driver hit while executing it.
pub type Completion = Box<dyn FnOnce(Result<()>) + Send + 'static>;

/// A raw bus transfer: command header followed by data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    buf: Bytes,
}

impl Transfer {
    /// Wrap prebuilt transfer bytes (header included).
    pub fn from_bytes(buf: impl Into<Bytes>) -> Self {
        Self { buf: buf.into() }
    }

    /// Build a write of `data` starting at `addr`.
    pub fn write(addr: u16, data: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(COMMAND_LEN + data.len());
        buf.put_slice(&command::encode(Instruction::Write, addr));
        buf.put_slice(data);
        Self { buf: buf.freeze() }
    }

    /// Decoded command header.
    pub fn command(&self) -> Option<(Instruction, u16)> {
        command::decode(&self.buf)
    }

    /// Data following the command header.
    pub fn payload(&self) -> &[u8] {
        self.buf.get(COMMAND_LEN..).unwrap_or_default()
    }

    /// Full wire bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Wire length including the command header.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Access to the controller over its control bus.
///
/// `read` and `write` are synchronous round trips. `submit_async` queues a
/// transfer and returns immediately: on `Ok` the completion callback is
/// invoked exactly once, on a context other than the caller's; on `Err` the
/// transfer was never queued and the callback is dropped without running.
/// Transfers submitted from one thread execute in submission order.
pub trait SpiBus: Send + Sync {
    /// Read `len` bytes starting at `addr`.
    fn read(&self, addr: u16, len: usize) -> Result<Bytes>;

    /// Write `data` starting at `addr`.
    fn write(&self, addr: u16, data: &[u8]) -> Result<()>;

    /// Queue `transfer` for execution and return without waiting.
    fn submit_async(&self, transfer: Transfer, complete: Completion) -> Result<()>;

    /// Read a 32-bit little-endian register.
    fn read_u32(&self, addr: u16) -> Result<u32> {
        let buf = self.read(addr, 4)?;
        let word: [u8; 4] = buf
            .as_ref()
            .try_into()
            .map_err(|_| BusError::Malformed("short register read"))?;
        Ok(u32::from_le_bytes(word))
    }

    /// Read only the bytes of a register covered by `mask`.
    ///
    /// Bits outside `mask` are returned as zero.
    fn read_mask(&self, addr: u16, mask: u32) -> Result<u32> {
        let Some((first, last)) = mask_span(mask) else {
            return Ok(0);
        };
        let buf = self.read(addr + first as u16, last - first + 1)?;
        if buf.len() != last - first + 1 {
            return Err(BusError::Malformed("short register read"));
        }
        let mut word = [0u8; 4];
        word[first..=last].copy_from_slice(&buf);
        Ok(u32::from_le_bytes(word) & mask)
    }

    /// Write only the bytes of a register covered by `mask`.
    fn write_mask(&self, addr: u16, value: u32, mask: u32) -> Result<()> {
        let Some((first, last)) = mask_span(mask) else {
            return Ok(());
        };
        let word = value.to_le_bytes();
        self.write(addr + first as u16, &word[first..=last])
    }
}

impl<B: SpiBus + ?Sized> SpiBus for Arc<B> {
    fn read(&self, addr: u16, len: usize) -> Result<Bytes> {
        (**self).read(addr, len)
    }

    fn write(&self, addr: u16, data: &[u8]) -> Result<()> {
        (**self).write(addr, data)
    }

    fn submit_async(&self, transfer: Transfer, complete: Completion) -> Result<()> {
        (**self).submit_async(transfer, complete)
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingBus {
        regs: Mutex<[u8; 8]>,
        writes: Mutex<Vec<(u16, Vec<u8>)>>,
    }

    impl SpiBus for RecordingBus {
        fn read(&self, addr: u16, len: usize) -> Result<Bytes> {
            let regs = self.regs.lock();
            let start = addr as usize;
            regs.get(start..start + len)
                .map(Bytes::copy_from_slice)
                .ok_or(BusError::AddressOutOfRange { addr, len })
        }

        fn write(&self, addr: u16, data: &[u8]) -> Result<()> {
            let mut regs = self.regs.lock();
            let start = addr as usize;
            regs[start..start + data.len()].copy_from_slice(data);
            self.writes.lock().push((addr, data.to_vec()));
            Ok(())
        }

        fn submit_async(&self, transfer: Transfer, complete: Completion) -> Result<()> {
            let (_, addr) = transfer.command().ok_or(BusError::Malformed("header"))?;
            complete(self.write(addr, transfer.payload()));
            Ok(())
        }
    }

    #[test]
    fn write_transfer_layout() {
        let transfer = Transfer::write(0x05d, &[0x03]);
        assert_eq!(transfer.as_bytes(), &[0x20, 0x5d, 0x03]);
        assert_eq!(transfer.command(), Some((Instruction::Write, 0x05d)));
        assert_eq!(transfer.payload(), &[0x03]);
        assert_eq!(transfer.len(), 3);
    }

    #[test]
    fn payload_of_header_only_transfer_is_empty() {
        let transfer = Transfer::from_bytes(vec![0x20, 0x00]);
        assert!(transfer.payload().is_empty());
    }

    #[test]
    fn write_mask_touches_only_covered_bytes() {
        let bus = RecordingBus::default();
        bus.write_mask(0, 0x0000_0100, 0x0000_0100).unwrap();

        let writes = bus.writes.lock();
        assert_eq!(writes.as_slice(), &[(1, vec![0x01])]);
    }

    #[test]
    fn read_mask_reassembles_word() {
        let bus = RecordingBus::default();
        bus.write(4, &[0xaa, 0xbb, 0xcc, 0xdd]).unwrap();

        assert_eq!(bus.read_mask(4, 0x00ff_0000).unwrap(), 0x00cc_0000);
        assert_eq!(bus.read_mask(4, 0x0000_0001).unwrap(), 0x0000_0000);
        assert_eq!(bus.read_u32(4).unwrap(), 0xddcc_bbaa);
    }

    #[test]
    fn arc_forwards_to_inner_bus() {
        let bus = Arc::new(RecordingBus::default());
        let done = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&done);

        bus.submit_async(
            Transfer::write(2, &[0x11]),
            Box::new(move |res| *slot.lock() = Some(res.is_ok())),
        )
        .unwrap();

        assert_eq!(*done.lock(), Some(true));
        assert_eq!(bus.read(2, 1).unwrap().as_ref(), &[0x11]);
    }
}
