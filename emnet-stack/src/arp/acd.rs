//! ## emnet-stack::arp::acd
//! **Address conflict detection (RFC 5227 style)**
//!
//! [`AcdMachine::step`] is a pure transition function: it consumes an
//! [`AcdEvent`] and the current time and returns the [`AcdAction`]s the
//! caller must carry out. No frames are built and no interface is touched
//! here, which keeps every transition testable without a link.
//!
//! ```text
//!   Idle --start--> Probing{1} --tick--> ... Probing{N} --tick--> Claimed
//!                      |                                            |
//!                      +--conflict--> renew? --> Probing / Idle     +--conflict--> defend / suppress
//! ```

use std::fmt;
use std::net::Ipv4Addr;

use emnet_config::{AcdConfig, MAX_PROBES};
use emnet_core::alloc::IfaceId;
use emnet_protocols::{ArpPacket, MacAddr};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcdPhase {
    Idle,
    /// `sent` probes for `candidate` are out.
    Probing { candidate: Ipv4Addr, sent: u32 },
    Claimed { addr: Ipv4Addr },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcdEvent {
    Start {
        iface: IfaceId,
        mac: MacAddr,
        candidate: Ipv4Addr,
    },
    /// Periodic timer.
    Tick,
    /// Any ARP packet received on the machine's interface.
    Arp(ArpPacket),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResponse {
    /// Announcement sent to reassert the address.
    Defend,
    /// Repeated conflict inside the defend interval, left unanswered.
    Suppress,
    /// Probing restarts with a candidate supplied by the policy.
    Renew,
    /// Address given up.
    Abandon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcdAction {
    Probe {
        iface: IfaceId,
        candidate: Ipv4Addr,
    },
    Announce {
        iface: IfaceId,
        addr: Ipv4Addr,
    },
    /// Bind `addr` to the interface.
    Configure {
        iface: IfaceId,
        addr: Ipv4Addr,
    },
    Conflict {
        iface: IfaceId,
        addr: Ipv4Addr,
        from: MacAddr,
        response: ConflictResponse,
    },
    /// `addr` must no longer be used on the interface.
    Abandoned {
        iface: IfaceId,
        addr: Ipv4Addr,
    },
}

/// Decisions ACD delegates to the embedding application.
pub trait AcdPolicy: Send {
    /// `lost` is taken; return another address to probe, if any.
    fn renew(&mut self, _iface: IfaceId, _lost: Ipv4Addr) -> Option<Ipv4Addr> {
        None
    }

    /// Whether to reassert a claimed address against `from`.
    fn defend(&mut self, _iface: IfaceId, _addr: Ipv4Addr, _from: MacAddr) -> bool {
        true
    }

    /// Whether to announce anyway when `from` conflicts again inside the
    /// defend interval.
    fn restart(&mut self, _iface: IfaceId, _addr: Ipv4Addr, _from: MacAddr) -> bool {
        false
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPolicy;

impl AcdPolicy for DefaultPolicy {}

pub struct AcdMachine {
    phase: AcdPhase,
    iface: IfaceId,
    mac: MacAddr,
    probe_count: u32,
    defend_interval_ms: u64,
    last_conflict: Option<(MacAddr, u64)>,
    policy: Box<dyn AcdPolicy>,
}

impl AcdMachine {
    pub fn new(config: &AcdConfig) -> Self {
        let mut machine = Self {
            phase: AcdPhase::Idle,
            iface: IfaceId(0),
            mac: MacAddr::ZERO,
            probe_count: 1,
            defend_interval_ms: 0,
            last_conflict: None,
            policy: Box::new(DefaultPolicy),
        };
        machine.configure(config.probe_count, config.defend_interval_ms, None);
        machine
    }

    /// Probe count is clamped to `1..=MAX_PROBES`. `None` keeps the current
    /// policy.
    pub fn configure(
        &mut self,
        probe_count: u32,
        defend_interval_ms: u64,
        policy: Option<Box<dyn AcdPolicy>>,
    ) {
        self.probe_count = probe_count.clamp(1, MAX_PROBES);
        self.defend_interval_ms = defend_interval_ms;
        if let Some(policy) = policy {
            self.policy = policy;
        }
    }

    pub fn phase(&self) -> AcdPhase {
        self.phase
    }

    pub fn iface(&self) -> IfaceId {
        self.iface
    }

    pub fn probe_count(&self) -> u32 {
        self.probe_count
    }

    pub fn step(&mut self, event: AcdEvent, now: u64) -> Vec<AcdAction> {
        let mut actions = Vec::new();
        match event {
            AcdEvent::Start {
                iface,
                mac,
                candidate,
            } => {
                self.iface = iface;
                self.mac = mac;
                self.begin_probing(candidate, &mut actions);
            }
            AcdEvent::Tick => self.tick(&mut actions),
            AcdEvent::Arp(arp) => self.on_arp(&arp, now, &mut actions),
        }
        actions
    }

    fn begin_probing(&mut self, candidate: Ipv4Addr, actions: &mut Vec<AcdAction>) {
        debug!(iface = %self.iface, %candidate, probes = self.probe_count, "probing");
        self.last_conflict = None;
        self.phase = AcdPhase::Probing { candidate, sent: 1 };
        actions.push(AcdAction::Probe {
            iface: self.iface,
            candidate,
        });
    }

    fn tick(&mut self, actions: &mut Vec<AcdAction>) {
        let AcdPhase::Probing { candidate, sent } = self.phase else {
            return;
        };
        if sent < self.probe_count {
            self.phase = AcdPhase::Probing {
                candidate,
                sent: sent + 1,
            };
            actions.push(AcdAction::Probe {
                iface: self.iface,
                candidate,
            });
            return;
        }

        info!(iface = %self.iface, addr = %candidate, "address claimed");
        self.phase = AcdPhase::Claimed { addr: candidate };
        actions.push(AcdAction::Configure {
            iface: self.iface,
            addr: candidate,
        });
        actions.push(AcdAction::Announce {
            iface: self.iface,
            addr: candidate,
        });
    }

    fn on_arp(&mut self, arp: &ArpPacket, now: u64, actions: &mut Vec<AcdAction>) {
        if arp.sender_hw == self.mac {
            return;
        }
        match self.phase {
            AcdPhase::Idle => {}
            AcdPhase::Probing { candidate, .. } => {
                let taken = arp.sender_ip == candidate;
                let contested = arp.is_probe() && arp.target_ip == candidate;
                if taken || contested {
                    warn!(iface = %self.iface, %candidate, from = %arp.sender_hw, "candidate address in use");
                    self.give_up(candidate, arp.sender_hw, actions);
                }
            }
            AcdPhase::Claimed { addr } => {
                if arp.sender_ip == addr {
                    self.defend(addr, arp.sender_hw, now, actions);
                }
            }
        }
    }

    fn defend(&mut self, addr: Ipv4Addr, from: MacAddr, now: u64, actions: &mut Vec<AcdAction>) {
        let repeat = matches!(
            self.last_conflict,
            Some((mac, at)) if mac == from && now.saturating_sub(at) < self.defend_interval_ms
        );

        if repeat {
            let forced = self.policy.restart(self.iface, addr, from);
            let response = if forced {
                ConflictResponse::Defend
            } else {
                ConflictResponse::Suppress
            };
            debug!(iface = %self.iface, %addr, %from, ?response, "repeated conflict");
            actions.push(AcdAction::Conflict {
                iface: self.iface,
                addr,
                from,
                response,
            });
            if forced {
                actions.push(AcdAction::Announce {
                    iface: self.iface,
                    addr,
                });
            }
            return;
        }

        self.last_conflict = Some((from, now));
        if self.policy.defend(self.iface, addr, from) {
            warn!(iface = %self.iface, %addr, %from, "defending address");
            actions.push(AcdAction::Conflict {
                iface: self.iface,
                addr,
                from,
                response: ConflictResponse::Defend,
            });
            actions.push(AcdAction::Announce {
                iface: self.iface,
                addr,
            });
        } else {
            warn!(iface = %self.iface, %addr, %from, "yielding address");
            self.give_up(addr, from, actions);
        }
    }

    fn give_up(&mut self, addr: Ipv4Addr, from: MacAddr, actions: &mut Vec<AcdAction>) {
        let next = self.policy.renew(self.iface, addr);
        actions.push(AcdAction::Conflict {
            iface: self.iface,
            addr,
            from,
            response: if next.is_some() {
                ConflictResponse::Renew
            } else {
                ConflictResponse::Abandon
            },
        });
        actions.push(AcdAction::Abandoned {
            iface: self.iface,
            addr,
        });
        match next {
            Some(candidate) => self.begin_probing(candidate, actions),
            None => self.phase = AcdPhase::Idle,
        }
    }
}

impl fmt::Debug for AcdMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcdMachine")
            .field("phase", &self.phase)
            .field("iface", &self.iface)
            .field("probe_count", &self.probe_count)
            .field("defend_interval_ms", &self.defend_interval_ms)
            .field("last_conflict", &self.last_conflict)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const IF0: IfaceId = IfaceId(0);
    const OURS: MacAddr = MacAddr::new(0x02, 0, 0, 0, 0, 0x01);
    const THEIRS: MacAddr = MacAddr::new(0x02, 0, 0, 0, 0, 0x99);
    const OTHER: MacAddr = MacAddr::new(0x02, 0, 0, 0, 0, 0x77);
    const ADDR: Ipv4Addr = Ipv4Addr::new(169, 254, 10, 20);

    fn machine(probes: u32) -> AcdMachine {
        AcdMachine::new(&AcdConfig {
            probe_count: probes,
            defend_interval_ms: 10_000,
        })
    }

    fn claimed() -> AcdMachine {
        let mut acd = machine(1);
        acd.step(
            AcdEvent::Start {
                iface: IF0,
                mac: OURS,
                candidate: ADDR,
            },
            0,
        );
        acd.step(AcdEvent::Tick, 1000);
        assert_eq!(acd.phase(), AcdPhase::Claimed { addr: ADDR });
        acd
    }

    fn conflict_from(mac: MacAddr) -> AcdEvent {
        AcdEvent::Arp(ArpPacket::announcement(mac, ADDR))
    }

    fn responses(actions: &[AcdAction]) -> Vec<ConflictResponse> {
        actions
            .iter()
            .filter_map(|a| match a {
                AcdAction::Conflict { response, .. } => Some(*response),
                _ => None,
            })
            .collect()
    }

    fn announces(actions: &[AcdAction]) -> bool {
        actions.iter().any(|a| matches!(a, AcdAction::Announce { .. }))
    }

    #[test]
    fn probes_then_claims() {
        let mut acd = machine(3);
        let start = AcdEvent::Start {
            iface: IF0,
            mac: OURS,
            candidate: ADDR,
        };
        assert_eq!(
            acd.step(start, 0),
            vec![AcdAction::Probe { iface: IF0, candidate: ADDR }]
        );
        assert_eq!(acd.step(AcdEvent::Tick, 1000).len(), 1);
        assert_eq!(acd.step(AcdEvent::Tick, 2000).len(), 1);
        assert_eq!(acd.phase(), AcdPhase::Probing { candidate: ADDR, sent: 3 });

        let actions = acd.step(AcdEvent::Tick, 3000);
        assert_eq!(
            actions,
            vec![
                AcdAction::Configure { iface: IF0, addr: ADDR },
                AcdAction::Announce { iface: IF0, addr: ADDR },
            ]
        );
        assert!(acd.step(AcdEvent::Tick, 4000).is_empty());
    }

    #[test]
    fn probe_count_is_clamped() {
        let mut acd = machine(3);
        acd.configure(50, 1, None);
        assert_eq!(acd.probe_count(), MAX_PROBES);
        acd.configure(0, 1, None);
        assert_eq!(acd.probe_count(), 1);
    }

    #[test]
    fn reply_for_candidate_abandons_probing() {
        let mut acd = machine(3);
        acd.step(
            AcdEvent::Start {
                iface: IF0,
                mac: OURS,
                candidate: ADDR,
            },
            0,
        );
        let actions = acd.step(AcdEvent::Arp(ArpPacket::reply(THEIRS, ADDR, OURS, ADDR)), 10);
        assert_eq!(responses(&actions), vec![ConflictResponse::Abandon]);
        assert!(actions.contains(&AcdAction::Abandoned { iface: IF0, addr: ADDR }));
        assert_eq!(acd.phase(), AcdPhase::Idle);
    }

    #[test]
    fn simultaneous_probe_is_a_conflict() {
        let mut acd = machine(3);
        acd.step(
            AcdEvent::Start {
                iface: IF0,
                mac: OURS,
                candidate: ADDR,
            },
            0,
        );
        // Our own probe echoed back is not.
        assert!(acd.step(AcdEvent::Arp(ArpPacket::probe(OURS, ADDR)), 1).is_empty());
        let actions = acd.step(AcdEvent::Arp(ArpPacket::probe(THEIRS, ADDR)), 2);
        assert_eq!(responses(&actions), vec![ConflictResponse::Abandon]);
    }

    #[test]
    fn renew_policy_restarts_with_new_candidate() {
        struct NextAddr;
        impl AcdPolicy for NextAddr {
            fn renew(&mut self, _iface: IfaceId, lost: Ipv4Addr) -> Option<Ipv4Addr> {
                let o = lost.octets();
                Some(Ipv4Addr::new(o[0], o[1], o[2], o[3] + 1))
            }
        }

        let mut acd = machine(2);
        acd.configure(2, 10_000, Some(Box::new(NextAddr)));
        acd.step(
            AcdEvent::Start {
                iface: IF0,
                mac: OURS,
                candidate: ADDR,
            },
            0,
        );
        let actions = acd.step(conflict_from(THEIRS), 5);
        let next = Ipv4Addr::new(169, 254, 10, 21);
        assert_eq!(responses(&actions), vec![ConflictResponse::Renew]);
        assert_eq!(
            actions.last(),
            Some(&AcdAction::Probe { iface: IF0, candidate: next })
        );
        assert_eq!(acd.phase(), AcdPhase::Probing { candidate: next, sent: 1 });
    }

    #[test]
    fn first_conflict_is_defended() {
        let mut acd = claimed();
        let actions = acd.step(conflict_from(THEIRS), 2000);
        assert_eq!(responses(&actions), vec![ConflictResponse::Defend]);
        assert!(announces(&actions));
        assert_eq!(acd.phase(), AcdPhase::Claimed { addr: ADDR });
    }

    #[test]
    fn repeat_within_interval_is_suppressed() {
        let mut acd = claimed();
        acd.step(conflict_from(THEIRS), 2000);

        let actions = acd.step(conflict_from(THEIRS), 5000);
        assert_eq!(responses(&actions), vec![ConflictResponse::Suppress]);
        assert!(!announces(&actions));

        // A different host is defended again at once.
        let actions = acd.step(conflict_from(OTHER), 5001);
        assert_eq!(responses(&actions), vec![ConflictResponse::Defend]);

        // Same host again, but the interval since its last record ran out.
        acd.step(conflict_from(THEIRS), 6000);
        let actions = acd.step(conflict_from(THEIRS), 16_000);
        assert_eq!(responses(&actions), vec![ConflictResponse::Defend]);
    }

    #[test]
    fn restart_policy_overrides_suppression() {
        struct Insist(Arc<AtomicUsize>);
        impl AcdPolicy for Insist {
            fn restart(&mut self, _iface: IfaceId, _addr: Ipv4Addr, _from: MacAddr) -> bool {
                self.0.fetch_add(1, Ordering::Relaxed);
                true
            }
        }

        let asked = Arc::new(AtomicUsize::new(0));
        let mut acd = claimed();
        acd.configure(1, 10_000, Some(Box::new(Insist(asked.clone()))));
        acd.step(conflict_from(THEIRS), 2000);
        let actions = acd.step(conflict_from(THEIRS), 3000);
        assert_eq!(responses(&actions), vec![ConflictResponse::Defend]);
        assert!(announces(&actions));
        assert_eq!(asked.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn declining_to_defend_abandons_address() {
        struct Yield;
        impl AcdPolicy for Yield {
            fn defend(&mut self, _iface: IfaceId, _addr: Ipv4Addr, _from: MacAddr) -> bool {
                false
            }
        }

        let mut acd = claimed();
        acd.configure(1, 10_000, Some(Box::new(Yield)));
        let actions = acd.step(conflict_from(THEIRS), 2000);
        assert!(actions.contains(&AcdAction::Abandoned { iface: IF0, addr: ADDR }));
        assert_eq!(acd.phase(), AcdPhase::Idle);
    }

    #[test]
    fn unrelated_traffic_is_ignored() {
        let mut acd = claimed();
        let other = Ipv4Addr::new(169, 254, 10, 30);
        assert!(acd
            .step(AcdEvent::Arp(ArpPacket::request(THEIRS, other, ADDR)), 2000)
            .is_empty());
    }
}
