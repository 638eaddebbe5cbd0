#![allow(dead_code)]

use std::sync::Arc;

use mcpfd_bus::SimController;
use mcpfd_frame::{CanFrame, CanId};
use mcpfd_tx::{FlowSignal, SlotRegistry, TxConfig, TxOutcome, TxPipeline, TxTransport};
use parking_lot::Mutex;

/// Upstream transport that records everything the pipeline tells it.
#[derive(Default)]
pub struct RecordingTransport {
    completions: Mutex<Vec<(u32, TxOutcome)>>,
    signals: Mutex<Vec<FlowSignal>>,
}

impl RecordingTransport {
    pub fn completions(&self) -> Vec<(u32, TxOutcome)> {
        self.completions.lock().clone()
    }

    pub fn completed_handles(&self) -> Vec<u32> {
        self.completions.lock().iter().map(|(handle, _)| *handle).collect()
    }

    pub fn signals(&self) -> Vec<FlowSignal> {
        self.signals.lock().clone()
    }
}

impl TxTransport for RecordingTransport {
    type Handle = u32;

    fn on_frame_complete(&self, handle: u32, outcome: TxOutcome) {
        self.completions.lock().push((handle, outcome));
    }

    fn set_flow_state(&self, signal: FlowSignal) {
        self.signals.lock().push(signal);
    }
}

pub type SimPipeline = TxPipeline<Arc<SimController>, Arc<RecordingTransport>>;

pub struct Harness {
    pub pipeline: SimPipeline,
    pub sim: Arc<SimController>,
    pub transport: Arc<RecordingTransport>,
}

/// Pipeline attached to a simulated controller programmed with the same layout.
pub fn attach(config: TxConfig) -> Harness {
    let sim = Arc::new(SimController::new(SlotRegistry::new(&config).sim_config()));
    let transport = Arc::new(RecordingTransport::default());
    let pipeline = TxPipeline::attach(Arc::clone(&sim), Arc::clone(&transport), config)
        .expect("config should be valid");
    Harness {
        pipeline,
        sim,
        transport,
    }
}

pub fn config(slots: usize) -> TxConfig {
    TxConfig {
        slot_count: slots,
        tef_count: slots,
        ..TxConfig::default()
    }
}

pub fn frame(id: u16, len: usize) -> CanFrame {
    let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
    CanFrame::new_fd(CanId::standard(id).expect("id should be valid"), data)
        .expect("frame should be valid")
}
