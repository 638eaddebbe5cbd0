use std::sync::Arc;

use mcpfd_bus::regs::{self, CAN_FIFOSTA_ABORT_MASK};
use mcpfd_bus::SpiBus;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::pipeline::{Inner, Phase, TxPipeline};
use crate::status::InterruptStatus;
use crate::transport::{TxOutcome, TxTransport};

impl<B: SpiBus + 'static, T: TxTransport> TxPipeline<B, T> {
    /// Release every slot whose FIFO is flagged in `status.txatif`.
    ///
    /// Each flag is cleared in `status` once its slot has been handled.
    /// Returns the number of slots released.
    pub fn handle_abort(&self, status: &mut InterruptStatus) -> Result<usize> {
        let inner = &self.inner;
        let slots = inner.registry.fifo_mask_to_slots(status.txatif);
        let foreign = status.txatif & !inner.registry.slot_mask_to_fifos(slots);
        if foreign != 0 {
            warn!(fifos = format_args!("{foreign:#x}"), "abort flagged on fifos outside the pipeline");
        }

        let mut handled = 0;
        for info in inner.registry.slots() {
            if slots & (1 << info.index()) == 0 {
                continue;
            }
            let fifo = info.fifo();
            let fifosta = inner.bus.read_u32(regs::fifosta(fifo))?;
            debug!(
                slot = info.index(),
                fifo,
                fifosta = format_args!("{fifosta:#x}"),
                "transmission aborted"
            );
            inner
                .bus
                .write_mask(regs::fifosta(fifo), 0, CAN_FIFOSTA_ABORT_MASK)?;

            let done = {
                let mut ledger = inner.ledger.lock();
                inner.release(&mut ledger, info.index(), TxOutcome::Aborted)
            };
            inner.notify(done);
            status.txatif &= !(1 << fifo);
            handled += 1;
        }
        Ok(handled)
    }
}

impl<B: SpiBus + 'static, T: TxTransport> Inner<B, T> {
    /// Withdraw the request pending on `slot`'s FIFO.
    ///
    /// The slot stays in flight: the abort interrupt releases it, or its
    /// event record if the stale object was already on the wire.
    pub(crate) fn request_abort(self: &Arc<Self>, slot: usize, generation: u64) {
        let Some(info) = self.registry.slot(slot) else {
            return;
        };
        let on_abort = self.completion(slot, generation, Phase::Abort);
        if let Err(err) = self.bus.submit_async(info.abort_transfer(), on_abort) {
            error!(slot, fifo = info.fifo(), %err, "abort request rejected by bus");
        }
    }
}
