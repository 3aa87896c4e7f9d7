use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use stream_lab_abstract::{ChannelConfig, ClientConfig, StreamerConfig};
use stream_lab_proto::{StreamingClient, StreamingStreamer};
use stream_lab_simulator::{SimulationReport, Simulator, scenario_runner};

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless adaptive streaming simulator")]
struct Args {
    /// Load a scenario from disk; flags below still override the channel.
    #[arg(long)]
    scenario: Option<PathBuf>,

    #[arg(long)]
    loss_rate: Option<f64>,

    #[arg(long)]
    corrupt_rate: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    duration_ms: Option<u64>,

    /// Stream rate of the default streamer (ignored with --scenario).
    #[arg(long)]
    stream_fps: Option<u32>,

    /// Packets per frame for both peers (ignored with --scenario).
    #[arg(long)]
    frame_packets: Option<u32>,

    /// Write a JSON trace of the finished simulation.
    #[arg(long)]
    trace_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    info!("stream-lab-sim-cli starting…");

    let report = if let Some(path) = &args.scenario {
        run_scenario_file(&args, path)?
    } else {
        run_default_sim(&args)?
    };
    log_summary(&report);

    if let Some(trace_path) = &args.trace_out {
        write_trace(trace_path, &report)?;
    }

    Ok(())
}

impl Args {
    fn apply_channel_overrides(&self, config: &mut ChannelConfig) {
        if let Some(v) = self.loss_rate {
            config.loss_rate = v;
        }
        if let Some(v) = self.corrupt_rate {
            config.corrupt_rate = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = self.duration_ms {
            config.duration_ms = v;
        }
    }
}

fn run_scenario_file(args: &Args, path: &Path) -> Result<SimulationReport> {
    let scenario = scenario_runner::load_scenario(path)?;
    let (mut channel, client_cfg, streamer_cfg) = scenario_runner::merged_configs(&scenario)?;
    args.apply_channel_overrides(&mut channel);

    let streamer = Box::new(StreamingStreamer::new(streamer_cfg)?);
    let client = Box::new(StreamingClient::new(client_cfg)?);
    scenario_runner::run_scenario(&scenario, channel, streamer, client)
}

fn run_default_sim(args: &Args) -> Result<SimulationReport> {
    let mut channel = ChannelConfig {
        loss_rate: 0.01,
        min_latency: 10,
        max_latency: 60,
        seed: 42,
        ..Default::default()
    };
    args.apply_channel_overrides(&mut channel);

    let mut client_cfg = ClientConfig::default();
    let mut streamer_cfg = StreamerConfig::default();
    if let Some(fps) = args.stream_fps {
        streamer_cfg.stream_fps = fps;
    }
    if let Some(count) = args.frame_packets {
        client_cfg.frame_packet_count = count;
        streamer_cfg.frame_packet_count = count;
    }

    let streamer = Box::new(StreamingStreamer::new(streamer_cfg)?);
    let client = Box::new(StreamingClient::new(client_cfg)?);

    info!("Starting default headless simulation…");
    let mut sim = Simulator::new(channel, streamer, client);
    sim.run_until_complete()?;
    info!("Simulation complete.");
    Ok(sim.export_report())
}

fn log_summary(report: &SimulationReport) {
    info!(
        "Simulation duration: {} ms | data datagrams: {} | feedback datagrams: {} | frames played: {} | hit ratio: {}",
        report.duration_ms,
        report.streamer_datagram_count,
        report.client_datagram_count,
        report.frames_played.len(),
        report
            .hit_ratio()
            .map_or_else(|| "n/a".to_string(), |r| format!("{r:.3}")),
    );
}

fn write_trace(path: &Path, report: &SimulationReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("Failed to serialize simulation trace")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write trace file {}", path.display()))?;
    Ok(())
}
