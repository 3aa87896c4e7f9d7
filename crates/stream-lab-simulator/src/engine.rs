use crate::trace::SimulationReport;
use anyhow::{Context, Result};
use bytes::Bytes;
use rand::Rng;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use stream_lab_abstract::{ChannelConfig, Header, StreamPeer, SystemContext, HEADER_LEN};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeId {
    Streamer,
    Client,
}

impl NodeId {
    pub fn peer(&self) -> Self {
        match self {
            NodeId::Streamer => NodeId::Client,
            NodeId::Client => NodeId::Streamer,
        }
    }
}

#[derive(Debug)]
pub enum EventType {
    DatagramArrival {
        to: NodeId,
        payload: Bytes,
    },
    TimerExpiry {
        node: NodeId,
        timer_id: u32,
        generation: u64,
    },
    /// Stops both peers; the queue then drains and the run completes.
    Shutdown,
}

#[derive(Debug)]
struct Event {
    time: u64,
    event_type: EventType,
    id: u64, // Unique ID to differentiate events at same time
}

// Custom Ord for Min-Heap (smallest time pops first)
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse comparison for time: smallest time is Greater in BinaryHeap
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// A compact textual summary of important link-layer events for inspection.
#[derive(Debug, Clone, Serialize)]
pub struct LinkEventSummary {
    pub time: u64,
    pub description: String,
}

/// Actions buffered during a peer's callback
#[derive(Default)]
struct ActionBuffer {
    outgoing: Vec<Bytes>,
    timers_start: Vec<(u64, u32)>, // (delay, id)
    timers_cancel: Vec<u32>,
    logs: Vec<String>,
    played: Vec<u64>,
    metrics: Vec<(String, f64)>,
}

/// Context implementation passed to the peer
struct ScopedContext<'a> {
    buffer: &'a mut ActionBuffer,
    now: u64,
}

impl<'a> SystemContext for ScopedContext<'a> {
    fn send_datagram(&mut self, payload: Bytes) {
        self.buffer.outgoing.push(payload);
    }

    fn start_timer(&mut self, delay_ms: u64, timer_id: u32) {
        self.buffer.timers_start.push((delay_ms, timer_id));
    }

    fn cancel_timer(&mut self, timer_id: u32) {
        self.buffer.timers_cancel.push(timer_id);
    }

    fn deliver_frame(&mut self, frame_index: u64) {
        self.buffer.played.push(frame_index);
    }

    fn log(&mut self, message: &str) {
        self.buffer.logs.push(message.to_string());
    }

    fn now(&self) -> u64 {
        self.now
    }

    fn record_metric(&mut self, name: &str, value: f64) {
        self.buffer.metrics.push((name.to_string(), value));
    }
}

pub struct Simulator {
    time: u64,
    event_queue: BinaryHeap<Event>,
    event_id_counter: u64,

    config: ChannelConfig,
    rng: rand::rngs::StdRng,

    // We hold the two endpoints directly
    // We use Box to allow different implementations
    pub streamer: Box<dyn StreamPeer>,
    pub client: Box<dyn StreamPeer>,

    /// Frames the client's consumer actually played, in play order.
    pub frames_played: Vec<u64>,
    pub streamer_datagram_count: u64,
    pub client_datagram_count: u64,

    /// Arbitrary time-series metrics recorded via `SystemContext::record_metric`
    /// Key: metric name (e.g., "client.hit_ratio"), Value: Vec<(time_ms, value)>
    pub metrics: HashMap<String, Vec<(u64, f64)>>,

    // Deterministic fault injection: drop first data packet with given seq numbers
    drop_data_seq_once: Vec<u32>,
    // Deterministic fault injection: drop first feedback packet with given raw values
    drop_feedback_value_once: Vec<u32>,

    /// Timeline of link events (drops, corruptions, sends, plays).
    pub link_events: Vec<LinkEventSummary>,

    /// Timer generations to handle cancellation.
    /// Key: (node, timer_id), Value: generation counter
    timer_generations: HashMap<(NodeId, u32), u64>,
}

impl Simulator {
    pub fn new(
        config: ChannelConfig,
        streamer: Box<dyn StreamPeer>,
        client: Box<dyn StreamPeer>,
    ) -> Self {
        use rand::SeedableRng;
        let rng = rand::rngs::StdRng::seed_from_u64(config.seed);

        Self {
            time: 0,
            event_queue: BinaryHeap::new(),
            event_id_counter: 0,
            config,
            rng,
            streamer,
            client,
            frames_played: Vec::new(),
            streamer_datagram_count: 0,
            client_datagram_count: 0,
            metrics: HashMap::new(),
            drop_data_seq_once: Vec::new(),
            drop_feedback_value_once: Vec::new(),
            link_events: Vec::new(),
            timer_generations: HashMap::new(),
        }
    }

    /// Register a deterministic fault: drop the first data packet whose seq equals `seq`.
    pub fn add_drop_data_seq_once(&mut self, seq: u32) {
        self.drop_data_seq_once.push(seq);
    }

    /// Register a deterministic fault: drop the first feedback packet whose raw value equals `value`.
    pub fn add_drop_feedback_value_once(&mut self, value: u32) {
        self.drop_feedback_value_once.push(value);
    }

    /// Expose current simulation config (for diagnostics)
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Return a slice of (time_ms, value) samples for a named metric, if present.
    pub fn metric_series(&self, name: &str) -> Option<&[(u64, f64)]> {
        self.metrics.get(name).map(|v| v.as_slice())
    }

    fn push_event(&mut self, time: u64, event_type: EventType) {
        self.event_queue.push(Event {
            time,
            event_type,
            id: self.event_id_counter,
        });
        self.event_id_counter += 1;
    }

    pub fn init(&mut self) -> Result<()> {
        {
            let mut buffer = ActionBuffer::default();
            {
                let mut ctx = ScopedContext {
                    buffer: &mut buffer,
                    now: self.time,
                };
                self.streamer
                    .init(&mut ctx)
                    .context("streamer init failed")?;
            }
            self.process_actions(NodeId::Streamer, buffer);
        }
        {
            let mut buffer = ActionBuffer::default();
            {
                let mut ctx = ScopedContext {
                    buffer: &mut buffer,
                    now: self.time,
                };
                self.client.init(&mut ctx).context("client init failed")?;
            }
            self.process_actions(NodeId::Client, buffer);
        }
        self.push_event(self.config.duration_ms, EventType::Shutdown);
        Ok(())
    }

    pub fn peek_next_event_time(&self) -> Option<u64> {
        self.event_queue.peek().map(|e| e.time)
    }

    pub fn current_time(&self) -> u64 {
        self.time
    }

    pub fn remaining_events(&self) -> usize {
        self.event_queue.len()
    }

    /// Process the next event. Returns true if an event was processed, false
    /// if the queue is empty. A peer's protocol-invariant violation aborts
    /// the run as an error.
    pub fn step(&mut self) -> Result<bool> {
        let event = match self.event_queue.pop() {
            Some(e) => e,
            None => return Ok(false),
        };

        self.time = event.time;
        debug!("Processing event at {}: {:?}", self.time, event.event_type);

        match event.event_type {
            EventType::DatagramArrival { to, payload } => {
                let mut buffer = ActionBuffer::default();
                {
                    let mut ctx = ScopedContext {
                        buffer: &mut buffer,
                        now: self.time,
                    };
                    match to {
                        NodeId::Streamer => self
                            .streamer
                            .on_datagram(&mut ctx, payload)
                            .context("streamer datagram callback failed")?,
                        NodeId::Client => self
                            .client
                            .on_datagram(&mut ctx, payload)
                            .context("client datagram callback failed")?,
                    }
                }
                self.process_actions(to, buffer);
            }
            EventType::TimerExpiry {
                node,
                timer_id,
                generation,
            } => {
                // Check if this timer event is still valid by comparing generations
                let key = (node, timer_id);
                match self.timer_generations.get(&key) {
                    Some(&current) if current == generation => {}
                    _ => {
                        // Cancelled or orphaned timer event; skip the callback.
                        debug!("Skipping stale timer event for timer_id={}", timer_id);
                        return Ok(true);
                    }
                }

                let mut buffer = ActionBuffer::default();
                {
                    let mut ctx = ScopedContext {
                        buffer: &mut buffer,
                        now: self.time,
                    };
                    match node {
                        NodeId::Streamer => self
                            .streamer
                            .on_timer(&mut ctx, timer_id)
                            .context("streamer timer callback failed")?,
                        NodeId::Client => self
                            .client
                            .on_timer(&mut ctx, timer_id)
                            .context("client timer callback failed")?,
                    }
                }
                self.process_actions(node, buffer);
            }
            EventType::Shutdown => {
                info!("Shutting both peers down at {} ms", self.time);
                let mut buffer = ActionBuffer::default();
                {
                    let mut ctx = ScopedContext {
                        buffer: &mut buffer,
                        now: self.time,
                    };
                    self.streamer.shutdown(&mut ctx);
                }
                self.process_actions(NodeId::Streamer, buffer);
                let mut buffer = ActionBuffer::default();
                {
                    let mut ctx = ScopedContext {
                        buffer: &mut buffer,
                        now: self.time,
                    };
                    self.client.shutdown(&mut ctx);
                }
                self.process_actions(NodeId::Client, buffer);
            }
        }
        Ok(true)
    }

    /// Produce a serializable snapshot of the current simulation state.
    pub fn export_report(&self) -> SimulationReport {
        SimulationReport {
            config: self.config.clone(),
            duration_ms: self.time,
            frames_played: self.frames_played.clone(),
            streamer_datagram_count: self.streamer_datagram_count,
            client_datagram_count: self.client_datagram_count,
            metrics: self.metrics.clone(),
            link_events: self.link_events.clone(),
        }
    }

    pub fn run_until_complete(&mut self) -> Result<()> {
        self.init()?;
        while self.step()? {}
        Ok(())
    }

    fn process_actions(&mut self, source_node: NodeId, buffer: ActionBuffer) {
        // First, fold metrics into simulator-wide store
        for (name, value) in buffer.metrics {
            self.metrics
                .entry(name)
                .or_default()
                .push((self.time, value));
        }

        for log in buffer.logs {
            info!("[{:?}] {}", source_node, log);
        }

        for frame_index in buffer.played {
            debug!("[{:?}] PLAYED frame {}", source_node, frame_index);
            self.link_events.push(LinkEventSummary {
                time: self.time,
                description: format!("[{:?}] PLAYED frame {}", source_node, frame_index),
            });
            self.frames_played.push(frame_index);
        }

        // Handle timer cancellations by incrementing the generation counter
        for timer_id in buffer.timers_cancel {
            let key = (source_node, timer_id);
            // Increment the generation to invalidate existing timer events
            let generation = self.timer_generations.entry(key).or_insert(0);
            *generation += 1;
        }

        for (delay, id) in buffer.timers_start {
            let key = (source_node, id);
            let generation = *self.timer_generations.entry(key).or_insert(0);
            self.push_event(
                self.time + delay,
                EventType::TimerExpiry {
                    node: source_node,
                    timer_id: id,
                    generation,
                },
            );
        }

        // Datagram transmission logic (Channel)
        for mut payload in buffer.outgoing {
            let header = Header::decode(&payload).ok();
            match source_node {
                NodeId::Streamer => {
                    self.streamer_datagram_count += 1;

                    // Deterministic tests: optionally drop first data packet with given seq
                    if let Some(header) = header
                        && let Some(pos) = self
                            .drop_data_seq_once
                            .iter()
                            .position(|s| *s == header.seq)
                    {
                        self.link_events.push(LinkEventSummary {
                            time: self.time,
                            description: format!(
                                "[Streamer->Client] DROP (deterministic) seq={}",
                                header.seq
                            ),
                        });
                        debug!("Deterministically dropping data packet seq={}", header.seq);
                        self.drop_data_seq_once.remove(pos);
                        continue;
                    }
                }
                NodeId::Client => {
                    self.client_datagram_count += 1;

                    // Deterministic tests: optionally drop first feedback with given value
                    if let Some(header) = header
                        && let Some(pos) = self
                            .drop_feedback_value_once
                            .iter()
                            .position(|v| *v == header.seq)
                    {
                        self.link_events.push(LinkEventSummary {
                            time: self.time,
                            description: format!(
                                "[Client->Streamer] DROP (deterministic) value={}",
                                header.seq
                            ),
                        });
                        debug!(
                            "Deterministically dropping feedback value={}",
                            header.seq
                        );
                        self.drop_feedback_value_once.remove(pos);
                        continue;
                    }
                }
            }

            // 1. Check Loss
            if self.rng.random::<f64>() < self.config.loss_rate {
                self.link_events.push(LinkEventSummary {
                    time: self.time,
                    description: format!(
                        "[{:?}->{:?}] DROP (random loss)",
                        source_node,
                        source_node.peer()
                    ),
                });
                debug!("Datagram lost in channel");
                continue;
            }

            // 2. Check Corruption
            if self.rng.random::<f64>() < self.config.corrupt_rate {
                self.link_events.push(LinkEventSummary {
                    time: self.time,
                    description: format!(
                        "[{:?}->{:?}] CORRUPT",
                        source_node,
                        source_node.peer()
                    ),
                });
                debug!("Datagram corrupted in channel");
                // Truncate below the header length; the receiving peer
                // rejects the remnant, so corruption degrades to loss.
                payload.truncate(HEADER_LEN / 2);
            }

            // 3. Calculate Latency
            let latency = self
                .rng
                .random_range(self.config.min_latency..=self.config.max_latency);
            let arrival_time = self.time + latency;

            // 4. Target Node
            let target_node = source_node.peer();

            self.push_event(
                arrival_time,
                EventType::DatagramArrival {
                    to: target_node,
                    payload,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Simulator;
    use bytes::Bytes;
    use std::cell::RefCell;
    use std::rc::Rc;
    use stream_lab_abstract::{ChannelConfig, ProtocolError, StreamPeer, SystemContext};

    #[derive(Default)]
    struct Flags {
        timer_fired: bool,
        timer_cancelled: bool,
    }

    struct TestPeer {
        flags: Rc<RefCell<Flags>>,
    }

    impl StreamPeer for TestPeer {
        fn init(&mut self, ctx: &mut dyn SystemContext) -> Result<(), ProtocolError> {
            // Timer 0 would fire at 10ms; timer 1 fires first and cancels it.
            ctx.start_timer(10, 0);
            ctx.start_timer(5, 1);
            Ok(())
        }

        fn on_datagram(
            &mut self,
            _ctx: &mut dyn SystemContext,
            _datagram: Bytes,
        ) -> Result<(), ProtocolError> {
            Ok(())
        }

        fn on_timer(
            &mut self,
            ctx: &mut dyn SystemContext,
            timer_id: u32,
        ) -> Result<(), ProtocolError> {
            match timer_id {
                0 => {
                    // Should NOT run if the cancellation worked.
                    self.flags.borrow_mut().timer_fired = true;
                }
                1 => {
                    ctx.cancel_timer(0);
                    self.flags.borrow_mut().timer_cancelled = true;
                }
                _ => {}
            }
            Ok(())
        }

        fn shutdown(&mut self, _ctx: &mut dyn SystemContext) {}
    }

    #[test]
    fn cancelled_timer_does_not_fire() {
        let flags = Rc::new(RefCell::new(Flags::default()));
        let streamer = Box::new(TestPeer {
            flags: Rc::clone(&flags),
        });
        let client = Box::new(TestPeer {
            flags: Rc::new(RefCell::new(Flags::default())),
        });

        let config = ChannelConfig {
            duration_ms: 100,
            ..Default::default()
        };
        let mut simulator = Simulator::new(config, streamer, client);
        simulator.run_until_complete().unwrap();

        assert!(flags.borrow().timer_cancelled, "timer 1 should have run");
        assert!(
            !flags.borrow().timer_fired,
            "cancelled timer should not have fired"
        );
    }

    #[test]
    fn run_completes_once_the_shutdown_drains_the_queue() {
        let config = ChannelConfig {
            duration_ms: 50,
            ..Default::default()
        };
        let mut simulator = Simulator::new(
            config,
            Box::new(TestPeer {
                flags: Rc::new(RefCell::new(Flags::default())),
            }),
            Box::new(TestPeer {
                flags: Rc::new(RefCell::new(Flags::default())),
            }),
        );
        simulator.run_until_complete().unwrap();
        assert_eq!(simulator.remaining_events(), 0);
        assert_eq!(simulator.current_time(), 50);
    }
}
