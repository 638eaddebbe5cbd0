use mcpfd_tx::{SlotRegistry, TefLayout};
use serde::Serialize;

use crate::cmd::LayoutArgs;
use crate::exit::{tx_error, CliResult, SUCCESS};
use crate::output::{self, OutputFormat};

#[derive(Serialize)]
struct SlotRow {
    slot: usize,
    fifo: u8,
    ram_offset: u16,
    fill_header: String,
    trigger: String,
}

#[derive(Serialize)]
struct TefRow {
    offset: u16,
    count: usize,
    record_size: usize,
    timestamp: bool,
}

impl From<TefLayout> for TefRow {
    fn from(tef: TefLayout) -> Self {
        Self {
            offset: tef.offset,
            count: tef.count,
            record_size: tef.record_size,
            timestamp: tef.timestamp,
        }
    }
}

#[derive(Serialize)]
struct LayoutOutput {
    schema_id: &'static str,
    ram_usage: usize,
    tef: TefRow,
    slots: Vec<SlotRow>,
}

pub fn run(args: LayoutArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.config.load()?;
    config
        .validate()
        .map_err(|err| tx_error("layout", err))?;

    let registry = SlotRegistry::new(&config);
    let slots = registry
        .slots()
        .iter()
        .map(|slot| SlotRow {
            slot: slot.index(),
            fifo: slot.fifo(),
            ram_offset: slot.ram_offset(),
            fill_header: output::hex(&slot.fill_header()),
            trigger: output::hex(slot.trigger_transfer().as_bytes()),
        })
        .collect();

    let layout = LayoutOutput {
        schema_id: "mcpfd.cli.layout/v1",
        ram_usage: config.ram_usage(),
        tef: registry.tef().into(),
        slots,
    };

    match format {
        OutputFormat::Json => output::print_json(&layout),
        OutputFormat::Table | OutputFormat::Pretty => print_table(&layout),
    }
    Ok(SUCCESS)
}

fn print_table(layout: &LayoutOutput) {
    let mut table = output::table(vec!["SLOT", "FIFO", "RAM", "FILL HEADER", "TRIGGER"]);
    for row in &layout.slots {
        table.add_row(vec![
            row.slot.to_string(),
            row.fifo.to_string(),
            format!("{:#05x}", row.ram_offset),
            row.fill_header.clone(),
            row.trigger.clone(),
        ]);
    }
    println!("{table}");

    output::print_pairs(&[
        ("tef_offset", format!("{:#05x}", layout.tef.offset)),
        ("tef_count", layout.tef.count.to_string()),
        ("tef_record_size", layout.tef.record_size.to_string()),
        ("tef_timestamp", layout.tef.timestamp.to_string()),
        ("ram_usage", layout.ram_usage.to_string()),
    ]);
}
