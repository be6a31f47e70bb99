//! CLI driver: loads a project manifest, runs the simulation to
//! completion (or resumes from a restart checkpoint), and writes the
//! echo file, tabular hydrograph/sedigraph output, dt-history log,
//! output grids, and the runtime performance summary on exit.

use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;
use trex_core::io::ascii_grid::{write_ascii_grid, AsciiGrid};
use trex_core::io::project::load_simulation;
use trex_core::io::restart::{read_restart, write_restart};
use trex_core::io::writers::{echo_path, stats_path, DtHistoryWriter, StatsWriter, TabularWriter};
use trex_core::stack::{Layer, Stack};

#[derive(Parser, Debug)]
#[command(name = "trex", about = "Coupled watershed hydrology / sediment transport simulator")]
struct Args {
    /// path to the project manifest (JSON)
    input_file: PathBuf,

    /// resume from a restart checkpoint instead of starting at t=0
    #[arg(long)]
    restart: Option<PathBuf>,

    /// write a restart checkpoint to this path on successful completion
    #[arg(long)]
    write_restart: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(short, long)]
    quiet: bool,
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = if quiet {
        tracing::Level::ERROR
    } else {
        match verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}

fn write_echo(output_dir: &std::path::Path, simulation: &trex_core::Simulation) -> anyhow::Result<()> {
    let mut text = String::new();
    text.push_str("TREX Echo File\n~~~~~~~~~~~~~~\n");
    text.push_str(&format!("Simulation id:   {}\n", simulation.config.general.simulation_id));
    text.push_str(&format!(
        "Start/end time:  {} / {} hours\n",
        simulation.config.general.start_time, simulation.config.general.end_time
    ));
    text.push_str(&format!("ksim:            {}\n", simulation.config.general.ksim));
    text.push_str(&format!(
        "Grid:            {} rows x {} cols, cellsize {}\n",
        simulation.grid.nrows(),
        simulation.grid.ncols(),
        simulation.grid.header.cellsize
    ));
    text.push_str(&format!("Channel nodes:   {}\n", simulation.water.nodes.len()));
    text.push_str(&format!("Solids classes:  {}\n", simulation.config.nsolids()));
    std::fs::write(echo_path(output_dir), text)?;
    Ok(())
}

/// Instantaneous discharge and per-class solids mass flux at an outlet
/// node's cross section, recomputed the same way the solids channel pass
/// derives advective discharge (spec §4.8 tabular output).
fn outlet_snapshot(node: &trex_core::water::ChannelNode, conc: &[f64]) -> (f64, Vec<f64>) {
    let (area, _) = node.cross_section(node.depth);
    let discharge = if node.manning_n > 0.0 {
        let rh = node.hydraulic_radius(node.depth);
        (1.0 / node.manning_n) * area * rh.powf(2.0 / 3.0) * node.friction_slope.abs().sqrt()
    } else {
        0.0
    };
    let masses = conc.iter().map(|c| c * discharge).collect();
    (discharge, masses)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose, args.quiet);

    let started = Instant::now();
    let mut simulation = load_simulation(&args.input_file)?;

    if let Some(restart_path) = &args.restart {
        let record = read_restart(restart_path)?;
        simulation.time = record.time;
        for (cell, depth) in simulation.water.cells.iter_mut().zip(record.overland_depths.iter()) {
            cell.depth = *depth;
        }
        for (cell, conc) in simulation.solids.overland.iter_mut().zip(record.overland_concentrations.iter()) {
            cell.conc = conc.clone();
        }
        for (node, depth) in simulation.water.nodes.iter_mut().zip(record.channel_depths.iter()) {
            node.depth = *depth;
        }
        if !record.overland_layers.is_empty() {
            simulation.overland_stacks = record
                .overland_layers
                .into_iter()
                .map(|layer_records| {
                    let layers: Vec<Layer> = layer_records.into_iter().map(Layer::from).collect();
                    Stack::new(layers, None)
                })
                .collect::<Result<_, _>>()?;
        }
        tracing::info!(time = record.time, "resumed from restart checkpoint");
    }

    let output_dir = args.input_file.parent().unwrap_or_else(|| std::path::Path::new("."));
    write_echo(output_dir, &simulation)?;

    let outlet_ids: Vec<usize> = {
        let mut ids: Vec<usize> = simulation.water.nodes.iter().filter_map(|n| n.outlet_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    };
    let mut tabular_writers = HashMap::new();
    let nsolids = simulation.config.nsolids();
    for &outlet_id in &outlet_ids {
        let writer = TabularWriter::new(output_dir.join(format!("outlet_{outlet_id}.tsv")));
        writer.write_header(nsolids)?;
        tabular_writers.insert(outlet_id, writer);
    }
    let dt_history_writer = DtHistoryWriter::new(output_dir.join("dt_history.out"));

    let end_time = simulation.config.general.end_time;
    tracing::info!(
        simulation_id = %simulation.config.general.simulation_id,
        end_time,
        "starting simulation"
    );

    let mut steps = 0u64;
    while simulation.time < end_time {
        let report = simulation.step()?;

        for (node_idx, node) in simulation.water.nodes.iter().enumerate() {
            let Some(outlet_id) = node.outlet_id else { continue };
            let Some(writer) = tabular_writers.get(&outlet_id) else { continue };
            let conc = &simulation.solids.channel[node_idx].conc;
            let (discharge, masses) = outlet_snapshot(node, conc);
            writer.write_row(report.time, discharge, &masses)?;
        }
        dt_history_writer.flush_if_full(&mut simulation.controller.history)?;

        steps += 1;
    }
    tracing::info!(steps, time = simulation.time, "simulation complete");

    if let Some(restart_path) = &args.write_restart {
        write_restart(
            restart_path,
            simulation.time,
            0.0,
            &simulation.water.cells,
            &simulation
                .solids
                .overland
                .iter()
                .map(|c| c.conc.clone())
                .collect::<Vec<_>>(),
            &simulation.water.nodes,
            &simulation.overland_stacks,
        )?;
    }

    let depth_grid = AsciiGrid {
        header: simulation.grid.header,
        values: simulation.water.cells.iter().map(|c| c.depth).collect(),
    };
    write_ascii_grid(&output_dir.join("final_depth.asc"), &depth_grid)?;

    let stats = StatsWriter::new(stats_path(output_dir));
    stats.write_runtime_summary(simulation.time, started.elapsed())?;
    stats.write_mass_balance(&simulation.accumulators)?;

    Ok(())
}
