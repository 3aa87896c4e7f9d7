use stream_lab_abstract::{ChannelConfig, ClientConfig, LossInjection, StreamerConfig};
use stream_lab_proto::{StreamingClient, StreamingStreamer};
use stream_lab_simulator::{SimulationReport, Simulator};

fn client_config() -> ClientConfig {
    ClientConfig {
        packet_size: 20,
        frame_packet_count: 4,
        playback_fps: 25,
        buffer_capacity: 40,
        pause_threshold: 25,
        resume_threshold: 5,
        target_level: 15,
        start_threshold: 3,
        admit_interval_ms: 20,
        consume_start_ms: 500,
        loss_injection: LossInjection::default(),
    }
}

fn streamer_config() -> StreamerConfig {
    StreamerConfig {
        packet_size: 20,
        frame_packet_count: 4,
        stream_fps: 60,
        priming_threshold: 3,
        generation_capacity: 10,
        loss_injection: LossInjection::default(),
    }
}

fn fixed_latency_channel(duration_ms: u64) -> ChannelConfig {
    ChannelConfig {
        loss_rate: 0.0,
        corrupt_rate: 0.0,
        min_latency: 5,
        max_latency: 5,
        seed: 1,
        duration_ms,
    }
}

fn run(channel: ChannelConfig, configure: impl FnOnce(&mut Simulator)) -> SimulationReport {
    let streamer = Box::new(StreamingStreamer::new(streamer_config()).unwrap());
    let client = Box::new(StreamingClient::new(client_config()).unwrap());
    let mut sim = Simulator::new(channel, streamer, client);
    configure(&mut sim);
    sim.run_until_complete().unwrap();
    sim.export_report()
}

#[test]
fn lossless_stream_plays_every_frame_in_order() {
    let report = run(fixed_latency_channel(4000), |_| {});

    assert!(
        report.frames_played.len() >= 30,
        "expected a steady stream of playback, got {} frames",
        report.frames_played.len()
    );
    assert!(
        report
            .frames_played
            .windows(2)
            .all(|pair| pair[0] < pair[1]),
        "playback order regressed: {:?}",
        report.frames_played
    );
    // No losses and production outpaces playback: every slot is a hit.
    assert_eq!(report.hit_ratio(), Some(1.0));
    // Playback is gap-free from frame 0.
    let expected: Vec<u64> = (0..report.frames_played.len() as u64).collect();
    assert_eq!(report.frames_played, expected);
}

#[test]
fn single_dropped_packet_is_recovered_before_its_slot() {
    // Sequence 9 is the first packet of frame 2.
    let report = run(fixed_latency_channel(3000), |sim| {
        sim.add_drop_data_seq_once(9);
    });

    assert!(report.frames_played.contains(&2), "frame 2 never played");
    assert_eq!(report.hit_ratio(), Some(1.0));
    // The drop and the retransmission both crossed the link.
    assert!(
        report
            .link_events
            .iter()
            .any(|event| event.description.contains("DROP (deterministic) seq=9"))
    );
}

#[test]
fn lossy_channel_still_sustains_playback() {
    let channel = ChannelConfig {
        loss_rate: 0.05,
        corrupt_rate: 0.01,
        min_latency: 5,
        max_latency: 30,
        seed: 7,
        duration_ms: 6000,
    };
    let report = run(channel, |_| {});

    assert!(
        report.frames_played.len() >= 20,
        "lossy run played only {} frames",
        report.frames_played.len()
    );
    let ratio = report.hit_ratio().expect("hit ratio was sampled");
    assert!(ratio >= 0.5, "hit ratio collapsed to {ratio:.3}");
    assert!(
        report
            .frames_played
            .windows(2)
            .all(|pair| pair[0] < pair[1])
    );
}

#[test]
fn scenario_toml_round_trip() {
    use stream_lab_abstract::TestScenario;
    use stream_lab_simulator::scenario_runner;

    let scenario: TestScenario = toml::from_str(
        r#"
            name = "smoke"
            description = "clean channel, short run"

            [config]
            loss_rate = 0.0
            min_latency = 5
            max_latency = 5
            seed = 3
            duration_ms = 3000

            [client]
            packet_size = 20
            frame_packet_count = 4
            playback_fps = 25
            start_threshold = 3
            target_level = 15
            pause_threshold = 25
            admit_interval_ms = 20
            consume_start_ms = 500

            [streamer]
            packet_size = 20
            frame_packet_count = 4
            stream_fps = 60
            priming_threshold = 3
            generation_capacity = 10

            [[actions]]
            type = "drop_next_data_seq"
            seq = 5

            [[assertions]]
            type = "min_frames_played"
            count = 20

            [[assertions]]
            type = "frame_played"
            index = 1

            [[assertions]]
            type = "min_hit_ratio"
            ratio = 0.99

            [[assertions]]
            type = "streamer_packet_count"
            min = 20
        "#,
    )
    .unwrap();

    let (channel, client_cfg, streamer_cfg) = scenario_runner::merged_configs(&scenario).unwrap();
    let streamer = Box::new(StreamingStreamer::new(streamer_cfg).unwrap());
    let client = Box::new(StreamingClient::new(client_cfg).unwrap());
    scenario_runner::run_scenario(&scenario, channel, streamer, client).unwrap();
}

#[test]
fn mismatched_peer_framing_is_rejected() {
    use stream_lab_abstract::TestScenario;
    use stream_lab_simulator::scenario_runner;

    let scenario: TestScenario = toml::from_str(
        r#"
            name = "bad-framing"
            description = "peers disagree on packets per frame"

            [config]

            [client]
            frame_packet_count = 4

            [streamer]
            frame_packet_count = 8

            [[assertions]]
            type = "min_frames_played"
            count = 1
        "#,
    )
    .unwrap();

    assert!(scenario_runner::merged_configs(&scenario).is_err());
}
