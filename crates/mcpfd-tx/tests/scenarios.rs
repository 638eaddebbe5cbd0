mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{attach, config, frame};
use mcpfd_bus::regs;
use mcpfd_frame::object::{FLAGS_FDF, FLAGS_SEQ_SHIFT};
use mcpfd_tx::{
    FlowSignal, FlowState, ServiceReport, SubmitStatus, TxConfig, TxOutcome,
};

fn sent(ts: u32) -> TxOutcome {
    TxOutcome::Sent {
        timestamp: Some(ts),
    }
}

#[test]
fn four_slots_fill_complete_and_restart() {
    let h = attach(config(4));
    assert_eq!(h.pipeline.manage_queue(FlowState::Started), FlowState::Started);

    for handle in 0..4u32 {
        let status = h.pipeline.submit(&frame(0x100 + handle as u16, 8), handle);
        assert_eq!(status, SubmitStatus::Accepted { slot: handle as usize });
    }
    assert_eq!(h.pipeline.flow_state(), FlowState::Stopped);

    h.sim.flush();
    assert_eq!(h.pipeline.partition().in_flight, 0b1111);
    assert_eq!(h.sim.pending_fifos(), 0b1_1110);
    assert_eq!(h.pipeline.submit(&frame(0x200, 8), 4), SubmitStatus::Busy(4));

    // Slot 2 (FIFO 3) finishes first.
    assert!(h.sim.transmit(3));
    let report = h.pipeline.service_interrupts().expect("service should succeed");
    assert_eq!(
        report,
        ServiceReport {
            completed: 1,
            aborted: 0,
            restarted: false,
        }
    );
    assert_eq!(h.transport.completions(), vec![(2, sent(0x100))]);

    let partition = h.pipeline.partition();
    assert_eq!(partition.completed, 0b0100);
    assert_eq!(partition.in_flight, 0b1011);
    assert_eq!(partition.idle, 0);
    assert_eq!(h.pipeline.submit(&frame(0x200, 8), 5), SubmitStatus::Busy(5));
    assert!(!h.pipeline.restart());
    assert_eq!(h.pipeline.partition(), partition);

    assert_eq!(h.sim.transmit_pending(), vec![1, 2, 4]);
    let report = h.pipeline.service_interrupts().expect("service should succeed");
    assert_eq!(report.completed, 3);
    assert!(report.restarted);

    assert_eq!(h.transport.completed_handles(), vec![2, 0, 1, 3]);
    assert!(h
        .transport
        .completions()
        .iter()
        .all(|(_, outcome)| outcome.is_success()));
    assert_eq!(h.pipeline.partition().idle, 0b1111);
    assert_eq!(h.pipeline.flow_state(), FlowState::Started);
    assert_eq!(
        h.transport.signals(),
        vec![FlowSignal::Start, FlowSignal::Stop, FlowSignal::Start]
    );

    let stats = h.pipeline.stats();
    assert_eq!(stats.tx_packets, 4);
    assert_eq!(stats.tx_bytes, 32);
    assert_eq!(stats.tef_mismatches, 0);
    assert_eq!(stats.drift_warnings, 0);
}

#[test]
fn abort_releases_slot_with_error_accounting() {
    let h = attach(config(4));
    h.pipeline.manage_queue(FlowState::Started);
    h.pipeline.submit(&frame(0x10, 4), 0);
    h.pipeline.submit(&frame(0x11, 4), 1);
    h.sim.flush();

    assert!(h.sim.abort(2));
    let report = h.pipeline.service_interrupts().expect("service should succeed");
    assert_eq!(report.completed, 0);
    assert_eq!(report.aborted, 1);

    assert_eq!(h.transport.completions(), vec![(1, TxOutcome::Aborted)]);
    let stats = h.pipeline.stats();
    assert_eq!(stats.tx_aborted_errors, 1);
    assert_eq!(stats.tx_packets, 0);
    assert_eq!(h.sim.peek_register(regs::CAN_TXATIF), 0);
    assert_eq!(h.sim.peek_register(regs::fifosta(2)) & regs::CAN_FIFOSTA_ABORT_MASK, 0);

    let partition = h.pipeline.partition();
    assert_eq!(partition.completed, 0b0010);
    assert_eq!(partition.in_flight, 0b0001);
    assert_eq!(partition.idle, 0b1100);

    // The aborted slot is recycled together with the others.
    h.pipeline.submit(&frame(0x12, 4), 2);
    h.pipeline.submit(&frame(0x13, 4), 3);
    h.sim.flush();
    assert_eq!(h.sim.transmit_pending(), vec![1, 3, 4]);
    let report = h.pipeline.service_interrupts().expect("service should succeed");
    assert_eq!(report.completed, 3);
    assert!(report.restarted);
    assert_eq!(h.pipeline.partition().idle, 0b1111);
}

#[test]
fn event_releases_exactly_its_slot_and_advances_cursor() {
    let h = attach(config(4));
    h.pipeline.manage_queue(FlowState::Started);
    for handle in 0..3 {
        h.pipeline.submit(&frame(0x20, 1), handle);
    }
    h.sim.flush();

    assert!(h.sim.transmit(2));
    h.pipeline.service_interrupts().expect("service should succeed");

    assert_eq!(h.transport.completions(), vec![(1, sent(0x100))]);
    assert_eq!(h.pipeline.tef_cursor(), 1);
    assert_eq!(h.sim.tef_level(), 0);
    let partition = h.pipeline.partition();
    assert_eq!(partition.completed, 0b0010);
    assert_eq!(partition.in_flight, 0b0101);
}

#[test]
fn cursor_wraps_around_event_ring() {
    let h = attach(config(2));
    h.pipeline.manage_queue(FlowState::Started);

    for round in 0..3u32 {
        h.pipeline.submit(&frame(0x30, 2), 2 * round);
        h.pipeline.submit(&frame(0x31, 2), 2 * round + 1);
        h.sim.flush();
        h.sim.transmit_pending();
        let report = h.pipeline.service_interrupts().expect("service should succeed");
        assert_eq!(report.completed, 2);
        assert!(report.restarted);
        assert_eq!(h.pipeline.tef_cursor(), 0);
    }
    assert_eq!(h.transport.completed_handles(), vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn single_slot_backpressure_until_restart() {
    let h = attach(config(1));
    h.pipeline.manage_queue(FlowState::Started);

    assert!(h.pipeline.submit(&frame(0x40, 8), 0).is_accepted());
    assert_eq!(h.pipeline.flow_state(), FlowState::Stopped);
    assert_eq!(h.pipeline.submit(&frame(0x40, 8), 1), SubmitStatus::Busy(1));

    h.sim.flush();
    assert!(h.sim.transmit(1));
    // Completed but not yet recycled.
    assert_eq!(h.pipeline.submit(&frame(0x40, 8), 1), SubmitStatus::Busy(1));

    let report = h.pipeline.service_interrupts().expect("service should succeed");
    assert!(report.restarted);
    assert_eq!(h.pipeline.flow_state(), FlowState::Started);
    assert!(h.pipeline.submit(&frame(0x40, 8), 1).is_accepted());
}

#[test]
fn object_image_lands_in_slot_ram() {
    let h = attach(config(4));
    h.pipeline.submit(&frame(0x123, 12), 0);
    h.sim.flush();

    let slot = h.pipeline.registry().slot(0).expect("slot 0 should exist");
    let image = h.sim.peek_ram(slot.ram_offset(), 20);
    assert_eq!(&image[0..4], &0x123u32.to_le_bytes());
    let flags = u32::from_le_bytes(image[4..8].try_into().expect("four bytes"));
    assert_eq!(flags >> FLAGS_SEQ_SHIFT, 1);
    assert_ne!(flags & FLAGS_FDF, 0);
    assert_eq!(&image[8..20], &(0..12).collect::<Vec<u8>>()[..]);

    let snapshot = &h.pipeline.slots()[0];
    assert_eq!(snapshot.fill_len, 10);
    assert_eq!(snapshot.frame_len, Some(12));
}

#[test]
fn conservative_scan_when_diff_is_empty() {
    let h = attach(config(4));
    h.pipeline.manage_queue(FlowState::Started);
    h.pipeline.submit(&frame(0x50, 8), 0);
    h.sim.flush();

    // Event for FIFO 1 while the controller still reports it requested.
    h.sim.inject_event(0x50, 1 << FLAGS_SEQ_SHIFT);
    let report = h.pipeline.service_interrupts().expect("service should succeed");

    assert_eq!(report.completed, 1);
    assert_eq!(h.transport.completions(), vec![(0, sent(0x100))]);
    assert_eq!(h.sim.tef_level(), 0);
    let stats = h.pipeline.stats();
    assert_eq!(stats.drift_warnings, 1);
    assert_eq!(stats.tef_mismatches, 0);
}

#[test]
fn event_for_idle_slot_is_tolerated() {
    let h = attach(config(4));
    h.sim.inject_event(0x1, 3 << FLAGS_SEQ_SHIFT);

    let report = h.pipeline.service_interrupts().expect("service should succeed");
    assert_eq!(report.completed, 1);
    assert!(h.transport.completions().is_empty());
    assert_eq!(h.pipeline.partition().idle, 0b1111);
    assert_eq!(h.pipeline.tef_cursor(), 1);

    let stats = h.pipeline.stats();
    assert_eq!(stats.tef_mismatches, 1);
    assert_eq!(stats.drift_warnings, 2);
}

#[test]
fn event_for_foreign_fifo_is_tolerated() {
    let h = attach(config(4));
    h.sim.inject_event(0x1, 20 << FLAGS_SEQ_SHIFT);

    h.pipeline.service_interrupts().expect("service should succeed");
    assert!(h.transport.completions().is_empty());
    assert_eq!(h.pipeline.stats().tef_mismatches, 1);
    assert_eq!(h.sim.tef_level(), 0);
}

#[test]
fn repeated_drift_raises_alarm() {
    let h = attach(TxConfig {
        drift_alarm_threshold: 2,
        ..config(4)
    });
    h.sim.inject_event(0x1, 20 << FLAGS_SEQ_SHIFT);
    h.pipeline.service_interrupts().expect("service should succeed");

    let stats = h.pipeline.stats();
    assert_eq!(stats.drift_warnings, 2);
    assert_eq!(stats.drift_alarms, 1);
}

#[test]
fn drift_alarm_can_be_disabled() {
    let h = attach(TxConfig {
        drift_alarm_threshold: 0,
        ..config(4)
    });
    for _ in 0..4 {
        h.sim.inject_event(0x1, 20 << FLAGS_SEQ_SHIFT);
    }
    h.pipeline.service_interrupts().expect("service should succeed");
    assert_eq!(h.pipeline.stats().drift_alarms, 0);
}

#[test]
fn rejected_submission_returns_busy_and_slot() {
    let h = attach(config(4));
    h.pipeline.manage_queue(FlowState::Started);
    h.sim.reject_next_submits(1);

    assert_eq!(h.pipeline.submit(&frame(0x60, 8), 7), SubmitStatus::Busy(7));
    assert_eq!(h.pipeline.partition().idle, 0b1111);
    assert_eq!(h.pipeline.flow_state(), FlowState::Stopped);
    assert_eq!(h.sim.counters().rejected, 1);
    assert!(h.transport.completions().is_empty());

    // The transport re-enables the queue explicitly.
    assert_eq!(h.pipeline.manage_queue(FlowState::Started), FlowState::Started);
    assert_eq!(
        h.pipeline.submit(&frame(0x60, 8), 7),
        SubmitStatus::Accepted { slot: 0 }
    );
}

#[test]
fn failed_fill_aborts_armed_request() {
    let h = attach(config(4));
    h.pipeline.manage_queue(FlowState::Started);
    h.sim.fail_next_completions(1);

    assert!(h.pipeline.submit(&frame(0x70, 8), 0).is_accepted());
    h.sim.flush();

    // The trigger armed the FIFO over a stale object; it is withdrawn on
    // the controller and the slot waits for the abort interrupt.
    assert!(h.transport.completions().is_empty());
    assert_eq!(h.pipeline.partition().in_flight, 0b0001);
    assert_eq!(h.sim.pending_fifos(), 0);
    assert_eq!(h.sim.peek_register(regs::CAN_TXATIF), 0b10);

    let report = h.pipeline.service_interrupts().expect("service should succeed");
    assert_eq!(report.aborted, 1);
    assert_eq!(h.transport.completions(), vec![(0, TxOutcome::Failed)]);
    assert_eq!(h.pipeline.partition().completed, 0b0001);

    let stats = h.pipeline.stats();
    assert_eq!(stats.tx_errors, 1);
    assert_eq!(stats.tx_aborted_errors, 0);
    assert_eq!(stats.tx_packets, 0);
}

#[test]
fn failed_fill_never_completes_the_next_frame() {
    let h = attach(config(1));
    h.pipeline.manage_queue(FlowState::Started);
    assert!(h.pipeline.submit(&frame(0x10, 8), 9).is_accepted());
    h.sim.flush();
    h.sim.transmit_pending();
    assert!(h.pipeline.service_interrupts().expect("service should succeed").restarted);

    h.sim.fail_next_completions(1);
    assert!(h.pipeline.submit(&frame(0x11, 8), 0).is_accepted());
    h.sim.flush();
    assert!(!h.sim.transmit(1), "stale request should have been withdrawn");

    let report = h.pipeline.service_interrupts().expect("service should succeed");
    assert!(report.restarted);

    assert!(h.pipeline.submit(&frame(0x12, 8), 1).is_accepted());
    h.sim.flush();
    h.pipeline.service_interrupts().expect("service should succeed");
    assert_eq!(
        h.transport.completions(),
        vec![(9, sent(0x100)), (0, TxOutcome::Failed)]
    );
    assert_eq!(h.sim.pending_fifos(), 0b10);

    h.sim.transmit_pending();
    h.pipeline.service_interrupts().expect("service should succeed");
    assert_eq!(
        h.transport.completions(),
        vec![(9, sent(0x100)), (0, TxOutcome::Failed), (1, sent(0x200))]
    );
    assert_eq!(h.pipeline.stats().tef_mismatches, 0);
}

#[test]
fn stale_object_sent_before_abort_is_reported_failed() {
    let h = attach(config(1));
    h.sim.set_auto_transmit(true);
    h.sim.fail_next_completions(1);

    assert!(h.pipeline.submit(&frame(0x20, 8), 3).is_accepted());
    h.sim.flush();
    assert_eq!(h.sim.tef_level(), 1);
    assert_eq!(h.pipeline.partition().in_flight, 0b1);

    // The object in RAM was never written, so its record names no slot.
    let report = h.pipeline.service_interrupts().expect("service should succeed");
    assert_eq!(report.completed, 1);
    assert!(report.restarted);
    assert_eq!(h.transport.completions(), vec![(3, TxOutcome::Failed)]);

    let stats = h.pipeline.stats();
    assert_eq!(stats.tx_errors, 1);
    assert_eq!(stats.tx_packets, 0);
    assert_eq!(stats.tef_mismatches, 1);
}

#[test]
fn rejected_trigger_returns_busy_and_slot() {
    let h = attach(config(4));
    h.pipeline.manage_queue(FlowState::Started);
    h.sim.reject_submit_after(1);

    assert_eq!(h.pipeline.submit(&frame(0x61, 8), 4), SubmitStatus::Busy(4));
    assert_eq!(h.pipeline.flow_state(), FlowState::Stopped);
    h.sim.flush();

    let partition = h.pipeline.partition();
    assert_eq!(partition.idle, 0b1111);
    assert_eq!(partition.filling | partition.triggering | partition.in_flight, 0);
    assert_eq!(h.sim.pending_fifos(), 0);
    assert_eq!(h.sim.counters().rejected, 1);

    h.pipeline.manage_queue(FlowState::Started);
    assert!(h.pipeline.submit(&frame(0x61, 8), 4).is_accepted());
    h.sim.flush();
    h.sim.transmit_pending();
    h.pipeline.service_interrupts().expect("service should succeed");
    assert_eq!(h.transport.completions(), vec![(4, sent(0x100))]);
}

#[test]
fn auto_transmit_pushes_many_frames_through() {
    let h = attach(config(4));
    h.sim.set_auto_transmit(true);
    h.pipeline.manage_queue(FlowState::Started);

    for handle in 0..20u32 {
        loop {
            match h.pipeline.submit(&frame(0x80, 16), handle) {
                SubmitStatus::Accepted { .. } => break,
                SubmitStatus::Busy(_) => {
                    h.sim.flush();
                    h.pipeline
                        .service_interrupts()
                        .expect("service should succeed");
                }
                SubmitStatus::Dropped(_) => panic!("frame should fit"),
            }
        }
    }
    h.sim.flush();
    h.pipeline.service_interrupts().expect("service should succeed");

    assert_eq!(h.transport.completed_handles(), (0..20).collect::<Vec<_>>());
    let stats = h.pipeline.stats();
    assert_eq!(stats.tx_packets, 20);
    assert_eq!(stats.tx_bytes, 320);
    assert_eq!(stats.drift_warnings, 0);
}

#[test]
fn detach_idle_pipeline_drains_immediately() {
    let h = attach(config(4));
    let report = h.pipeline.detach(Duration::from_millis(50));
    assert!(report.drained);
    assert_eq!(report.aborted, 0);
}

#[test]
fn detach_force_aborts_slots_still_in_flight() {
    let h = attach(config(4));
    h.pipeline.manage_queue(FlowState::Started);
    h.pipeline.submit(&frame(0x90, 8), 0);
    h.pipeline.submit(&frame(0x91, 8), 1);
    h.sim.flush();

    let observer = h.pipeline.clone();
    let report = h.pipeline.detach(Duration::from_millis(5));
    assert!(!report.drained);
    assert_eq!(report.aborted, 2);

    assert_eq!(
        h.transport.completions(),
        vec![(0, TxOutcome::Aborted), (1, TxOutcome::Aborted)]
    );
    assert_eq!(h.transport.signals().last(), Some(&FlowSignal::Stop));
    assert_eq!(observer.stats().tx_aborted_errors, 2);
    assert_eq!(observer.partition().completed, 0b0011);
}

#[test]
fn detach_waits_for_interrupt_context_to_drain() {
    let h = attach(config(4));
    h.pipeline.submit(&frame(0xa0, 8), 0);
    h.sim.flush();

    let servicer = h.pipeline.clone();
    let sim = Arc::clone(&h.sim);
    let interrupt = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        sim.transmit_pending();
        servicer.service_interrupts().expect("service should succeed");
    });

    let report = h.pipeline.detach(Duration::from_secs(5));
    interrupt.join().expect("interrupt thread should finish");

    assert!(report.drained);
    assert_eq!(report.aborted, 0);
    assert_eq!(h.transport.completions(), vec![(0, sent(0x100))]);
}
