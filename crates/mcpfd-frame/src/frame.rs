use bytes::Bytes;

use crate::dlc::{dlc_to_len, len_to_dlc, CANFD_MAX_DLEN, CAN_MAX_DLEN};
use crate::error::{FrameError, Result};
use crate::id::CanId;

/// Classic CAN 2.0 or CAN-FD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Classic,
    Fd,
}

/// A frame handed down by the network layer for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    id: CanId,
    kind: FrameKind,
    dlc: u8,
    data: Bytes,
    remote: bool,
    brs: bool,
    esi: bool,
}

impl CanFrame {
    /// Create a classic data frame (up to 8 bytes).
    pub fn new(id: CanId, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        if data.len() > CAN_MAX_DLEN {
            return Err(FrameError::PayloadTooLarge {
                size: data.len(),
                max: CAN_MAX_DLEN,
            });
        }
        Ok(Self {
            id,
            kind: FrameKind::Classic,
            dlc: data.len() as u8,
            data,
            remote: false,
            brs: false,
            esi: false,
        })
    }

    /// Create a CAN-FD data frame (up to 64 bytes).
    ///
    /// Lengths between valid FD sizes are rounded up to the next DLC and
    /// zero-padded when encoded.
    pub fn new_fd(id: CanId, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        if data.len() > CANFD_MAX_DLEN {
            return Err(FrameError::PayloadTooLarge {
                size: data.len(),
                max: CANFD_MAX_DLEN,
            });
        }
        Ok(Self {
            id,
            kind: FrameKind::Fd,
            dlc: len_to_dlc(data.len()),
            data,
            remote: false,
            brs: false,
            esi: false,
        })
    }

    /// Create a classic remote-request frame. DLC values above 8 are clamped.
    pub fn new_remote(id: CanId, dlc: u8) -> Self {
        Self {
            id,
            kind: FrameKind::Classic,
            dlc: dlc.min(CAN_MAX_DLEN as u8),
            data: Bytes::new(),
            remote: true,
            brs: false,
            esi: false,
        }
    }

    /// Request bit-rate switching for the data phase. Ignored for classic frames.
    pub fn with_brs(mut self, brs: bool) -> Self {
        self.brs = brs && self.is_fd();
        self
    }

    /// Set the error-state indicator. Ignored for classic frames.
    pub fn with_esi(mut self, esi: bool) -> Self {
        self.esi = esi && self.is_fd();
        self
    }

    pub fn id(&self) -> CanId {
        self.id
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn dlc(&self) -> u8 {
        self.dlc
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Payload length on the wire, as implied by the DLC.
    pub fn len(&self) -> usize {
        dlc_to_len(self.dlc)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_fd(&self) -> bool {
        self.kind == FrameKind::Fd
    }

    pub fn is_remote(&self) -> bool {
        self.remote
    }

    pub fn brs(&self) -> bool {
        self.brs
    }

    pub fn esi(&self) -> bool {
        self.esi
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(id: u16) -> CanId {
        CanId::standard(id).unwrap()
    }

    #[test]
    fn classic_frame_dlc_is_length() {
        let frame = CanFrame::new(sid(0x100), vec![1, 2, 3]).unwrap();
        assert_eq!(frame.dlc(), 3);
        assert_eq!(frame.len(), 3);
        assert!(!frame.is_fd());
    }

    #[test]
    fn classic_frame_rejects_nine_bytes() {
        let err = CanFrame::new(sid(0x100), vec![0; 9]).unwrap_err();
        assert_eq!(err, FrameError::PayloadTooLarge { size: 9, max: 8 });
    }

    #[test]
    fn fd_frame_rounds_dlc_up() {
        let frame = CanFrame::new_fd(sid(0x100), vec![0xaa; 10]).unwrap();
        assert_eq!(frame.dlc(), 9);
        assert_eq!(frame.len(), 12);
        assert_eq!(frame.data().len(), 10);
    }

    #[test]
    fn fd_frame_rejects_oversize() {
        assert!(CanFrame::new_fd(sid(1), vec![0; 65]).is_err());
    }

    #[test]
    fn remote_frame_clamps_dlc() {
        let frame = CanFrame::new_remote(sid(0x10), 12);
        assert!(frame.is_remote());
        assert_eq!(frame.dlc(), 8);
        assert!(frame.data().is_empty());
    }

    #[test]
    fn fd_only_flags_ignored_on_classic() {
        let classic = CanFrame::new(sid(1), Bytes::new()).unwrap().with_brs(true).with_esi(true);
        assert!(!classic.brs());
        assert!(!classic.esi());

        let fd = CanFrame::new_fd(sid(1), Bytes::new()).unwrap().with_brs(true);
        assert!(fd.brs());
    }
}
