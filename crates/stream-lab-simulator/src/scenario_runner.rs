use crate::engine::Simulator;
use crate::trace::SimulationReport;
use anyhow::{Context, Result, bail};
use std::fs;
use std::path::Path;
use stream_lab_abstract::{
    ChannelConfig, ClientConfig, StreamPeer, StreamerConfig, TestAction, TestAssertion,
    TestScenario,
};
use tracing::info;

pub fn load_scenario(path: &Path) -> Result<TestScenario> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
    let scenario: TestScenario =
        toml::from_str(&content).context("Failed to parse scenario file")?;
    Ok(scenario)
}

/// Merge a scenario's overrides onto the default configurations and check
/// the cross-peer agreement the protocol assumes.
pub fn merged_configs(
    scenario: &TestScenario,
) -> Result<(ChannelConfig, ClientConfig, StreamerConfig)> {
    let mut channel = ChannelConfig::default();
    scenario.config.apply_to(&mut channel);
    let mut client = ClientConfig::default();
    scenario.client.apply_to(&mut client);
    let mut streamer = StreamerConfig::default();
    scenario.streamer.apply_to(&mut streamer);

    if client.frame_packet_count != streamer.frame_packet_count {
        bail!(
            "scenario '{}': frame_packet_count disagrees between peers ({} vs {})",
            scenario.name,
            client.frame_packet_count,
            streamer.frame_packet_count
        );
    }
    if client.packet_size != streamer.packet_size {
        bail!(
            "scenario '{}': packet_size disagrees between peers ({} vs {})",
            scenario.name,
            client.packet_size,
            streamer.packet_size
        );
    }
    Ok((channel, client, streamer))
}

/// Run an already-loaded scenario with the given peers and evaluate its
/// assertions. Callers build the peers from [`merged_configs`].
pub fn run_scenario(
    scenario: &TestScenario,
    channel: ChannelConfig,
    streamer: Box<dyn StreamPeer>,
    client: Box<dyn StreamPeer>,
) -> Result<SimulationReport> {
    info!("Running scenario '{}': {}", scenario.name, scenario.description);

    let mut sim = Simulator::new(channel, streamer, client);
    configure_actions(&mut sim, &scenario.actions);
    sim.run_until_complete()
        .with_context(|| format!("scenario '{}' aborted", scenario.name))?;

    let report = sim.export_report();
    for assertion in &scenario.assertions {
        check_assertion(scenario, assertion, &report)?;
    }
    info!("Scenario '{}' passed", scenario.name);
    Ok(report)
}

pub fn configure_actions(sim: &mut Simulator, actions: &[TestAction]) {
    for action in actions {
        match action {
            TestAction::DropNextDataSeq { seq } => {
                sim.add_drop_data_seq_once(*seq);
            }
            TestAction::DropNextFeedbackValue { value } => {
                sim.add_drop_feedback_value_once(*value);
            }
        }
    }
}

fn check_assertion(
    scenario: &TestScenario,
    assertion: &TestAssertion,
    report: &SimulationReport,
) -> Result<()> {
    match assertion {
        TestAssertion::MinFramesPlayed { count } => {
            let played = report.frames_played.len() as u64;
            if played < *count {
                bail!(
                    "scenario '{}': expected at least {} frames played, got {}",
                    scenario.name,
                    count,
                    played
                );
            }
        }
        TestAssertion::FramePlayed { index } => {
            if !report.frames_played.contains(index) {
                bail!(
                    "scenario '{}': frame {} was never played",
                    scenario.name,
                    index
                );
            }
        }
        TestAssertion::MinHitRatio { ratio } => {
            let Some(actual) = report.hit_ratio() else {
                bail!(
                    "scenario '{}': no hit-ratio samples were recorded",
                    scenario.name
                );
            };
            if actual < *ratio {
                bail!(
                    "scenario '{}': hit ratio {:.3} below required {:.3}",
                    scenario.name,
                    actual,
                    ratio
                );
            }
        }
        TestAssertion::StreamerPacketCount { min, max } => {
            let count = report.streamer_datagram_count;
            if count < *min {
                bail!(
                    "scenario '{}': streamer sent {} datagrams, expected at least {}",
                    scenario.name,
                    count,
                    min
                );
            }
            if let Some(max) = max
                && count > *max
            {
                bail!(
                    "scenario '{}': streamer sent {} datagrams, expected at most {}",
                    scenario.name,
                    count,
                    max
                );
            }
        }
    }
    Ok(())
}
