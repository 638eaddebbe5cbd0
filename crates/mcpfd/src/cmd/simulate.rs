use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mcpfd_bus::{BusCounters, SimController};
use mcpfd_frame::{CanFrame, CanId};
use mcpfd_tx::{
    DetachReport, FlowSignal, FlowState, Partition, SlotRegistry, StatsSnapshot, SubmitStatus,
    TxOutcome, TxPipeline, TxTransport,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::cmd::SimulateArgs;
use crate::exit::{frame_error, tx_error, CliError, CliResult, SUCCESS, TIMEOUT};
use crate::output::{self, OutputFormat};

/// Passes without progress before the run is declared stalled.
const STALL_LIMIT: usize = 8;
const DETACH_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Default)]
struct CountingTransport {
    sent: AtomicU64,
    aborted: AtomicU64,
    failed: AtomicU64,
    starts: AtomicU64,
    stops: AtomicU64,
}

impl CountingTransport {
    fn finished(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
            + self.aborted.load(Ordering::Relaxed)
            + self.failed.load(Ordering::Relaxed)
    }
}

impl TxTransport for CountingTransport {
    type Handle = usize;

    fn on_frame_complete(&self, handle: usize, outcome: TxOutcome) {
        debug!(handle, ?outcome, "frame complete");
        let counter = match outcome {
            TxOutcome::Sent { .. } => &self.sent,
            TxOutcome::Aborted => &self.aborted,
            TxOutcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn set_flow_state(&self, signal: FlowSignal) {
        let counter = match signal {
            FlowSignal::Start => &self.starts,
            FlowSignal::Stop => &self.stops,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Serialize)]
struct Outcomes {
    sent: u64,
    aborted: u64,
    failed: u64,
    dropped: u64,
}

#[derive(Serialize)]
struct FlowSignals {
    starts: u64,
    stops: u64,
}

#[derive(Serialize)]
struct BusSummary {
    reads: u64,
    writes: u64,
    async_transfers: u64,
    rejected: u64,
    total: u64,
}

impl From<BusCounters> for BusSummary {
    fn from(counters: BusCounters) -> Self {
        Self {
            reads: counters.reads,
            writes: counters.writes,
            async_transfers: counters.async_transfers,
            rejected: counters.rejected,
            total: counters.total(),
        }
    }
}

#[derive(Serialize)]
struct SimulateOutput {
    schema_id: &'static str,
    frames: usize,
    passes: usize,
    busy: u64,
    restarts: u64,
    outcomes: Outcomes,
    flow_signals: FlowSignals,
    flow_state: FlowState,
    partition: Partition,
    stats: StatsSnapshot,
    bus: BusSummary,
    detach: DetachReport,
}

pub fn run(args: SimulateArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.config.load()?;
    config
        .validate()
        .map_err(|err| tx_error("simulate", err))?;
    let slot_count = config.slot_count;

    let sim = Arc::new(SimController::new(SlotRegistry::new(&config).sim_config()));
    let transport = Arc::new(CountingTransport::default());
    let pipeline = TxPipeline::attach(Arc::clone(&sim), Arc::clone(&transport), config)
        .map_err(|err| tx_error("attach", err))?;
    pipeline.manage_queue(FlowState::Started);

    let mut next = 0usize;
    let mut dropped = 0u64;
    let mut busy = 0u64;
    let mut restarts = 0u64;
    let mut transmissions = 0usize;
    let mut passes = 0usize;
    let mut idle_passes = 0usize;

    while transport.finished() + dropped < args.frames as u64 {
        passes += 1;
        let before = (next, transport.finished());

        while next < args.frames {
            let frame = build_frame(&args, next)?;
            match pipeline.submit(&frame, next) {
                SubmitStatus::Accepted { .. } => next += 1,
                SubmitStatus::Dropped(_) => {
                    dropped += 1;
                    next += 1;
                }
                SubmitStatus::Busy(_) => {
                    busy += 1;
                    break;
                }
            }
        }

        sim.flush();
        for fifo in fifos(sim.pending_fifos()) {
            transmissions += 1;
            if args.abort_every > 0 && transmissions % args.abort_every == 0 {
                sim.abort(fifo);
            } else {
                sim.transmit(fifo);
            }
        }

        let report = pipeline
            .service_interrupts()
            .map_err(|err| tx_error("service", err))?;
        if report.restarted {
            restarts += 1;
        }
        debug!(pass = passes, ?report, "service pass");

        if (next, transport.finished()) == before {
            idle_passes += 1;
            if idle_passes >= STALL_LIMIT {
                return Err(CliError::new(
                    TIMEOUT,
                    format!(
                        "simulation stalled after {} of {} frames",
                        transport.finished(),
                        args.frames
                    ),
                ));
            }
        } else {
            idle_passes = 0;
        }
    }

    let flow_state = pipeline.flow_state();
    let partition = pipeline.partition();
    let stats = pipeline.stats();
    let detach = pipeline.detach(DETACH_TIMEOUT);
    info!(frames = args.frames, passes, "simulation finished");

    let result = SimulateOutput {
        schema_id: "mcpfd.cli.simulate/v1",
        frames: args.frames,
        passes,
        busy,
        restarts,
        outcomes: Outcomes {
            sent: transport.sent.load(Ordering::Relaxed),
            aborted: transport.aborted.load(Ordering::Relaxed),
            failed: transport.failed.load(Ordering::Relaxed),
            dropped,
        },
        flow_signals: FlowSignals {
            starts: transport.starts.load(Ordering::Relaxed),
            stops: transport.stops.load(Ordering::Relaxed),
        },
        flow_state,
        partition,
        stats,
        bus: sim.counters().into(),
        detach,
    };

    match format {
        OutputFormat::Json => output::print_json(&result),
        OutputFormat::Table | OutputFormat::Pretty => print_table(&result, slot_count),
    }
    Ok(SUCCESS)
}

fn build_frame(args: &SimulateArgs, index: usize) -> CliResult<CanFrame> {
    let id = if args.extended_id {
        CanId::extended(0x1000 + (index as u32 & 0xffff))
    } else {
        CanId::standard(0x100 + (index as u16 & 0x3ff))
    }
    .map_err(|err| frame_error("frame id", err))?;

    let data: Vec<u8> = (0..args.payload_len)
        .map(|byte| (byte + index) as u8)
        .collect();
    let frame = if args.fd {
        CanFrame::new_fd(id, data).map(|frame| frame.with_brs(true))
    } else {
        CanFrame::new(id, data)
    };
    frame.map_err(|err| frame_error("frame", err))
}

fn fifos(mask: u32) -> impl Iterator<Item = u8> {
    (0..32u8).filter(move |fifo| mask & (1 << fifo) != 0)
}

fn print_table(result: &SimulateOutput, width: usize) {
    output::print_pairs(&[
        ("frames", result.frames.to_string()),
        ("passes", result.passes.to_string()),
        ("busy", result.busy.to_string()),
        ("restarts", result.restarts.to_string()),
        ("sent", result.outcomes.sent.to_string()),
        ("aborted", result.outcomes.aborted.to_string()),
        ("failed", result.outcomes.failed.to_string()),
        ("dropped", result.outcomes.dropped.to_string()),
        ("tx_packets", result.stats.tx_packets.to_string()),
        ("tx_bytes", result.stats.tx_bytes.to_string()),
        ("tef_mismatches", result.stats.tef_mismatches.to_string()),
        ("drift_warnings", result.stats.drift_warnings.to_string()),
        ("flow_state", format!("{:?}", result.flow_state)),
        ("completed_slots", output::mask(result.partition.completed, width)),
        ("idle_slots", output::mask(result.partition.idle, width)),
        ("bus_round_trips", result.bus.total.to_string()),
    ]);
}
