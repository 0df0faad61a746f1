//! In-Memory Network
//!
//! Hosts one coordinator and any number of client controllers over a
//! [`Broker`], all in one thread with a shared [`ManualClock`]. Used by the
//! end-to-end tests and the `demo` command.

use std::collections::{BTreeMap, VecDeque};

use tracing::warn;

use crate::config::AdminConfig;
use crate::core::clock::{Clock, EpochMillis, ManualClock};
use crate::network::admin::MatchmakingCoordinator;
use crate::network::broker::{Broker, BrokerError, Delivery};
use crate::network::client::{ClientConfig, ClientSessionController};
use crate::network::peer::PeerId;
use crate::network::transport::Command;

/// Upper bound on deliveries per [`LocalNetwork::pump`]; guards against
/// message storms between misbehaving state machines.
const MAX_DELIVERIES_PER_PUMP: usize = 100_000;

/// Single-threaded network of one admin and many clients.
#[derive(Debug)]
pub struct LocalNetwork {
    broker: Broker,
    clock: ManualClock,
    admin: MatchmakingCoordinator,
    clients: BTreeMap<PeerId, ClientSessionController>,
}

impl LocalNetwork {
    /// Network with a coordinator registered under its admin id.
    pub fn new(config: AdminConfig, clock: ManualClock) -> Result<Self, BrokerError> {
        let mut broker = Broker::new();
        broker.register_as(config.admin_id.clone())?;
        Ok(Self {
            broker,
            clock,
            admin: MatchmakingCoordinator::new(config),
            clients: BTreeMap::new(),
        })
    }

    /// Current time.
    pub fn now(&self) -> EpochMillis {
        self.clock.now_ms()
    }

    /// Shared clock.
    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// The coordinator.
    pub fn admin(&self) -> &MatchmakingCoordinator {
        &self.admin
    }

    /// Add a disconnected client; returns its transport id.
    pub fn add_client(&mut self, config: ClientConfig) -> Result<PeerId, BrokerError> {
        let id = self.broker.register()?;
        self.clients.insert(id.clone(), ClientSessionController::new(config));
        Ok(id)
    }

    /// Drop a client as if its process died.
    pub fn remove_client(&mut self, id: &PeerId) {
        if self.clients.remove(id).is_some() {
            let deliveries = self.broker.unregister(id);
            self.run(deliveries.into());
        }
    }

    /// Client by id.
    pub fn client(&self, id: &PeerId) -> Option<&ClientSessionController> {
        self.clients.get(id)
    }

    /// Mutable client by id. Call [`LocalNetwork::pump`] after acting on it.
    pub fn client_mut(&mut self, id: &PeerId) -> Option<&mut ClientSessionController> {
        self.clients.get_mut(id)
    }

    /// Ids of every client.
    pub fn client_ids(&self) -> Vec<PeerId> {
        self.clients.keys().cloned().collect()
    }

    /// Connect a client to the admin and deliver everything that follows.
    pub fn connect(&mut self, id: &PeerId) -> bool {
        let connected = match self.clients.get_mut(id) {
            Some(client) => client.connect(id.clone()).is_ok(),
            None => false,
        };
        self.pump();
        connected
    }

    /// Advance the clock, tick every state machine, and deliver.
    pub fn advance(&mut self, millis: i64) -> usize {
        self.clock.advance(millis);
        let now = self.now();
        self.admin.tick(now);
        for client in self.clients.values_mut() {
            client.tick(now);
        }
        self.pump()
    }

    /// Execute queued commands until the network is quiet. Returns the
    /// number of deliveries made.
    pub fn pump(&mut self) -> usize {
        self.run(VecDeque::new())
    }

    fn run(&mut self, mut deliveries: VecDeque<Delivery>) -> usize {
        let mut delivered = 0;
        loop {
            self.collect_commands(&mut deliveries);
            let Some(delivery) = deliveries.pop_front() else {
                break;
            };
            if delivered >= MAX_DELIVERIES_PER_PUMP {
                warn!("Delivery limit reached; dropping {} pending", deliveries.len() + 1);
                break;
            }
            delivered += 1;
            self.deliver(delivery);
        }
        delivered
    }

    fn collect_commands(&mut self, deliveries: &mut VecDeque<Delivery>) {
        let admin_id = self.admin.admin_id().clone();
        let mut batches: Vec<(PeerId, Vec<Command>)> = vec![(admin_id, self.admin.drain_commands())];
        for (id, client) in self.clients.iter_mut() {
            batches.push((id.clone(), client.drain_commands()));
        }

        for (from, commands) in batches {
            for command in commands {
                match self.broker.execute(&from, command) {
                    Ok(out) => deliveries.extend(out),
                    Err(e) => warn!("Dropped command from {}: {}", from.short(), e),
                }
            }
        }
    }

    fn deliver(&mut self, delivery: Delivery) {
        let now = self.now();
        if &delivery.to == self.admin.admin_id() {
            if let Err(e) = self.admin.handle(delivery.event, now) {
                warn!("Admin rejected event: {}", e);
            }
        } else if let Some(client) = self.clients.get_mut(&delivery.to) {
            if let Err(e) = client.handle(delivery.event, now) {
                warn!("Client {} rejected event: {}", delivery.to.short(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::jump::{Direction, JumpOutcome};
    use crate::game::platform::PlatformType;
    use crate::network::client::{ClientEvent, ClientState, QueueState};
    use rand::{Rng, SeedableRng};
    use std::sync::{Arc, Mutex};

    const T0: EpochMillis = 1_700_000_000_000;

    fn network() -> LocalNetwork {
        LocalNetwork::new(AdminConfig::default(), ManualClock::new(T0)).unwrap()
    }

    fn record(net: &mut LocalNetwork, id: &PeerId) -> Arc<Mutex<Vec<ClientEvent>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        net.client_mut(id)
            .unwrap()
            .on_event(move |e| sink.lock().unwrap().push(e.clone()));
        log
    }

    fn join(net: &mut LocalNetwork, id: &PeerId) {
        assert!(net.connect(id));
        net.client_mut(id).unwrap().join().unwrap();
        net.pump();
    }

    fn game_end(log: &Arc<Mutex<Vec<ClientEvent>>>) -> Option<Vec<PeerId>> {
        log.lock().unwrap().iter().find_map(|e| match e {
            ClientEvent::GameEnd { ranks, .. } => Some(ranks.clone()),
            _ => None,
        })
    }

    /// Climb with the correct direction as fast as the jump lock allows.
    fn climb(net: &mut LocalNetwork, id: &PeerId, jumps: usize) {
        for _ in 0..jumps {
            let client = net.client(id).unwrap();
            let next = client.platform_index() + 1;
            let target = client.platforms(next, 1)[0].platform_type;
            let direction = Direction::towards(target);
            let now = net.now();
            net.client_mut(id).unwrap().jump(direction, now).unwrap();
            net.pump();
            net.advance(250);
        }
    }

    #[test]
    fn test_two_client_session_end_to_end() {
        let mut net = network();
        let a = net.add_client(ClientConfig::default()).unwrap();
        let b = net.add_client(ClientConfig::default()).unwrap();
        let log_a = record(&mut net, &a);
        let log_b = record(&mut net, &b);

        join(&mut net, &a);
        net.advance(2_000);
        join(&mut net, &b);

        for id in [&a, &b] {
            assert!(matches!(
                net.client(id).unwrap().state(),
                ClientState::InQueue(QueueState::Starting { start_time, .. }) if start_time == T0 + 12_000
            ));
        }

        // Countdown elapses.
        net.advance(10_000);
        for id in [&a, &b] {
            let client = net.client(id).unwrap();
            assert_eq!(client.state(), ClientState::InSession);
            assert_eq!(client.roster().unwrap().len(), 2);
            assert_eq!(client.session_remaining(net.now()), Some(60));
        }

        // Exactly one link per pair, animals exchanged.
        assert!(net.broker.is_linked(&a, &b));
        assert_eq!(net.client(&a).unwrap().links(), vec![b.clone()]);
        assert_eq!(net.client(&b).unwrap().links(), vec![a.clone()]);
        assert!(log_a.lock().unwrap().contains(&ClientEvent::PeerAdd { peer: b.clone(), animal: "Bat".into() }));

        // Same platform column on both sides.
        let column_a: Vec<PlatformType> = net.client(&a).unwrap().platforms(0, 51).iter().map(|p| p.platform_type).collect();
        let column_b: Vec<PlatformType> = net.client(&b).unwrap().platforms(0, 51).iter().map(|p| p.platform_type).collect();
        assert_eq!(column_a, column_b);

        // b climbs further than a.
        climb(&mut net, &a, 3);
        climb(&mut net, &b, 6);
        assert_eq!(net.client(&a).unwrap().peer_platform(&b), Some(6));
        assert_eq!(net.client(&a).unwrap().live_rank(), Some(2));

        // Session end.
        let remaining = T0 + 12_000 + 60_000 - net.now();
        net.advance(remaining);

        let ranks_a = game_end(&log_a).unwrap();
        let ranks_b = game_end(&log_b).unwrap();
        assert_eq!(ranks_a, vec![b.clone(), a.clone()]);
        assert_eq!(ranks_a, ranks_b);

        for id in [&a, &b] {
            assert_eq!(net.client(id).unwrap().state(), ClientState::Disconnected);
        }
        assert_eq!(net.broker.link_count(), 0);
        assert_eq!(net.admin().sessions().count(), 0);
        assert!(!log_a.lock().unwrap().contains(&ClientEvent::ConnectionError));
    }

    #[test]
    fn test_peer_leaves_mid_session() {
        let mut net = network();
        let ids: Vec<PeerId> = (0..3).map(|_| net.add_client(ClientConfig::default()).unwrap()).collect();
        let logs: Vec<_> = ids.iter().map(|id| record(&mut net, id)).collect();
        for id in &ids {
            join(&mut net, id);
        }
        net.advance(10_000);
        assert_eq!(net.admin().sessions().count(), 1);

        net.remove_client(&ids[1]);
        for (i, log) in logs.iter().enumerate() {
            if i != 1 {
                assert!(log.lock().unwrap().contains(&ClientEvent::PeerRemove { peer: ids[1].clone() }));
            }
        }

        net.advance(60_000);
        let ranks = game_end(&logs[0]).unwrap();
        assert_eq!(ranks.len(), 2);
        assert!(!ranks.contains(&ids[1]));
    }

    #[test]
    fn test_leaving_during_countdown_sends_wait() {
        let mut net = network();
        let a = net.add_client(ClientConfig::default()).unwrap();
        let b = net.add_client(ClientConfig::default()).unwrap();
        let log_a = record(&mut net, &a);
        join(&mut net, &a);
        join(&mut net, &b);
        assert!(net.admin().countdown_start().is_some());

        net.remove_client(&b);
        assert_eq!(log_a.lock().unwrap().last(), Some(&ClientEvent::WaitForOthers));
        assert_eq!(net.client(&a).unwrap().state(), ClientState::InQueue(QueueState::Joining));

        net.advance(20_000);
        assert_eq!(net.admin().sessions().count(), 0);
    }

    #[test]
    fn test_randomized_scores_rank_consistently() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut net = network();
        let ids: Vec<PeerId> = (0..4).map(|_| net.add_client(ClientConfig::default()).unwrap()).collect();
        let logs: Vec<_> = ids.iter().map(|id| record(&mut net, id)).collect();
        for id in &ids {
            join(&mut net, id);
        }
        net.advance(10_000);

        let mut climbed = Vec::new();
        for id in &ids {
            let jumps = rng.gen_range(0..8);
            climb(&mut net, id, jumps);
            climbed.push((id.clone(), net.client(id).unwrap().score()));
        }

        let end = net.admin().sessions().next().unwrap().end_time;
        let now = net.now();
        net.advance(end - now);

        let ranks = game_end(&logs[0]).unwrap();
        for log in &logs[1..] {
            assert_eq!(game_end(log).unwrap(), ranks);
        }
        let score_of = |id: &PeerId| climbed.iter().find(|(p, _)| p == id).map(|(_, s)| *s).unwrap();
        for pair in ranks.windows(2) {
            assert!(score_of(&pair[0]) >= score_of(&pair[1]));
        }
    }

    #[test]
    fn test_jump_outside_session_is_error() {
        let mut net = network();
        let a = net.add_client(ClientConfig::default()).unwrap();
        net.connect(&a);
        let now = net.now();
        assert!(net.client_mut(&a).unwrap().jump(Direction::Up, now).is_err());
        // Non-arrow keys are dropped before the session check.
        assert_eq!(net.client_mut(&a).unwrap().key_down(99, now), Ok(JumpOutcome::Ignored));
    }
}
