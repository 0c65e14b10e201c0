//! Poll scheduler: drives the perpetual read cycle over the field bus.

use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::coalesce::{ReadRequest, address_map};
use crate::config::{TagHubConfig, TagType};
use crate::events::SharedEvents;
use crate::registry::SharedRegistry;
use crate::transport::RegisterSource;

/// One poll group's coalesced request list.
#[derive(Debug, Clone)]
pub struct PollGroup {
    pub tag_type: TagType,
    pub requests: Vec<ReadRequest>,
}

/// Counters for one completed cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub reads_ok: usize,
    pub reads_failed: usize,
}

/// Drives an unending poll cycle: for each group, issue its coalesced read
/// requests one at a time, write results into the registry, record an event
/// per read, then sleep for the configured delay and start over.
///
/// The scheduler owns the transport exclusively; a failed read is logged and
/// recorded but never retried within the cycle and never stops the loop.
pub struct PollScheduler<T: RegisterSource> {
    source: T,
    groups: Vec<PollGroup>,
    registry: SharedRegistry,
    events: SharedEvents,
    interval: Duration,
}

impl<T: RegisterSource> PollScheduler<T> {
    /// Build the scheduler from configuration. Request lists are derived
    /// from the configured addresses once, here; groups keep the fixed
    /// `input, output, inputc` order.
    pub fn from_config(
        config: &TagHubConfig,
        source: T,
        registry: SharedRegistry,
        events: SharedEvents,
    ) -> Self {
        let packet_size = config.server.packet_size;
        let mut groups = Vec::new();

        for tag_type in config.present_groups() {
            let addresses = config.group_addresses(tag_type);
            let requests = address_map(&addresses, packet_size);
            info!(
                group = tag_type.as_str(),
                addresses = addresses.len(),
                requests = requests.len(),
                "Coalesced poll group"
            );
            groups.push(PollGroup { tag_type, requests });
        }

        Self {
            source,
            groups,
            registry,
            events,
            interval: Duration::from_secs(config.server.polling_timeout_secs),
        }
    }

    /// Run until the shutdown flag flips. The in-flight request of the
    /// current cycle is allowed to finish; no further cycle starts after
    /// the flag is observed.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            groups = self.groups.len(),
            interval_secs = self.interval.as_secs(),
            "Starting poll scheduler"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let stats = self.poll_cycle().await;
            debug!(
                reads_ok = stats.reads_ok,
                reads_failed = stats.reads_failed,
                "Cycle complete"
            );

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Poll scheduler stopped");
    }

    /// Run one full cycle across all groups. Requests are issued strictly in
    /// coalesced order, one at a time.
    pub async fn poll_cycle(&mut self) -> CycleStats {
        let mut stats = CycleStats::default();

        for group in &self.groups {
            for request in &group.requests {
                let timestamp = chrono::Utc::now().timestamp_millis();

                match self.source.read_registers(request.start, request.count).await {
                    Ok(values) => {
                        let mut read = serde_json::Map::new();
                        for (offset, &value) in values.iter().enumerate() {
                            let address = request.start + offset as u16;
                            self.registry.update_from_poll(address, value, timestamp);
                            if let Some(name) = self.registry.name_for_address(address) {
                                read.insert(name.to_string(), json!(value));
                            }
                        }
                        self.events.push(
                            json!({
                                "group": group.tag_type.as_str(),
                                "start": request.start,
                                "count": request.count,
                                "status": "ok",
                                "tags": read,
                            }),
                            timestamp,
                        );
                        stats.reads_ok += 1;
                    }
                    Err(e) => {
                        warn!(
                            group = group.tag_type.as_str(),
                            start = request.start,
                            count = request.count,
                            "Read failed: {}",
                            e
                        );
                        self.events.push(
                            json!({
                                "group": group.tag_type.as_str(),
                                "start": request.start,
                                "count": request.count,
                                "status": "error",
                                "error": e.to_string(),
                            }),
                            timestamp,
                        );
                        stats.reads_failed += 1;
                    }
                }
            }
        }

        stats
    }

    /// The coalesced request lists, for startup logging and inspection.
    pub fn groups(&self) -> &[PollGroup] {
        &self.groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventCache;
    use crate::registry::TagRegistry;
    use crate::transport::TransportError;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Scripted register source: pops one canned response per read and
    /// records the requests it saw.
    struct ScriptedSource {
        responses: VecDeque<Result<Vec<u16>, TransportError>>,
        issued: Vec<(u16, u16)>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<Vec<u16>, TransportError>>) -> Self {
            Self {
                responses: responses.into(),
                issued: Vec::new(),
            }
        }
    }

    impl RegisterSource for ScriptedSource {
        async fn read_registers(
            &mut self,
            start: u16,
            count: u16,
        ) -> Result<Vec<u16>, TransportError> {
            self.issued.push((start, count));
            self.responses
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Read("script exhausted".into())))
        }
    }

    fn make_config() -> TagHubConfig {
        let json = r#"{
            server: { packet_size: 5, polling_timeout_secs: 1 },
            serial: { port: "/dev/plc" },
            tags: {
                t10: { address: 10, type: "input" },
                t11: { address: 11, type: "input" },
                t15: { address: 15, type: "input" },
                t20: { address: 20, type: "input" },
                out30: { address: 30, type: "output" },
            }
        }"#;
        json5::from_str(json).unwrap()
    }

    fn make_scheduler(
        responses: Vec<Result<Vec<u16>, TransportError>>,
    ) -> (PollScheduler<ScriptedSource>, SharedRegistry, SharedEvents) {
        let config = make_config();
        let registry = Arc::new(TagRegistry::from_config(&config));
        let events = Arc::new(EventCache::new(16));
        let scheduler = PollScheduler::from_config(
            &config,
            ScriptedSource::new(responses),
            registry.clone(),
            events.clone(),
        );
        (scheduler, registry, events)
    }

    #[tokio::test]
    async fn test_requests_issued_in_coalesced_order() {
        // input group: span 10..=20 -> (10,5),(15,5),(20,1); output: (30,1)
        let responses = (0..4).map(|_| Ok(vec![0u16; 5])).collect();
        let (mut scheduler, _registry, _events) = make_scheduler(responses);

        scheduler.poll_cycle().await;

        assert_eq!(
            scheduler.source.issued,
            vec![(10, 5), (15, 5), (20, 1), (30, 1)]
        );
    }

    #[tokio::test]
    async fn test_success_distributes_values_to_tags() {
        let responses = vec![
            Ok(vec![100, 101, 102, 103, 104]),
            Ok(vec![105, 106, 107, 108, 109]),
            Ok(vec![200]),
            Ok(vec![300]),
        ];
        let (mut scheduler, registry, events) = make_scheduler(responses);

        let stats = scheduler.poll_cycle().await;
        assert_eq!(stats.reads_ok, 4);
        assert_eq!(stats.reads_failed, 0);

        assert_eq!(registry.get("t10").unwrap().value, Some(100));
        assert_eq!(registry.get("t11").unwrap().value, Some(101));
        assert_eq!(registry.get("t15").unwrap().value, Some(105));
        assert_eq!(registry.get("t20").unwrap().value, Some(200));
        assert_eq!(registry.get("out30").unwrap().value, Some(300));
        assert_eq!(events.len(), 4);
    }

    #[tokio::test]
    async fn test_all_failures_do_not_stall_cycle() {
        let responses = (0..4)
            .map(|_| Err(TransportError::Read("line down".into())))
            .collect();
        let (mut scheduler, registry, events) = make_scheduler(responses);

        let stats = scheduler.poll_cycle().await;
        assert_eq!(stats.reads_ok, 0);
        assert_eq!(stats.reads_failed, 4);

        // Registry untouched, failures recorded as events
        for tag in registry.snapshot() {
            assert!(tag.value.is_none());
        }
        assert_eq!(events.len(), 4);
        for event in events.list() {
            assert_eq!(event.payload["status"], "error");
        }
    }

    #[tokio::test]
    async fn test_failed_request_does_not_block_later_ones() {
        let responses = vec![
            Err(TransportError::Read("noise".into())),
            Ok(vec![1, 2, 3, 4, 5]),
            Ok(vec![6]),
            Ok(vec![7]),
        ];
        let (mut scheduler, registry, _events) = make_scheduler(responses);

        let stats = scheduler.poll_cycle().await;
        assert_eq!(stats.reads_ok, 3);
        assert_eq!(stats.reads_failed, 1);

        // First span (10,5) failed, so t10/t11 are still unset
        assert!(registry.get("t10").unwrap().value.is_none());
        assert_eq!(registry.get("t15").unwrap().value, Some(1));
        assert_eq!(registry.get("t20").unwrap().value, Some(6));
    }

    #[tokio::test]
    async fn test_stop_prevents_further_cycles() {
        let responses = (0..4).map(|_| Ok(vec![0u16; 5])).collect();
        let (scheduler, _registry, events) = make_scheduler(responses);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(rx));

        // Let the first cycle finish, then stop
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        // Exactly one cycle's worth of events
        assert_eq!(events.len(), 4);
    }
}
