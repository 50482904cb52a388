//! Solid-state recorder model.
//!
//! A capacity-bounded list of prioritized packets. Fills may evict lower-priority data,
//! drains remove data in priority or arrival order, and every change is recorded as a
//! [`StorageTransaction`].

use crate::config::StorageConfig;
use crate::events::{EventCategory, SimEvent};
use crate::propagation::Epoch;
use rand::RngCore;
use rand_pcg::Pcg64Mcg;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Volumes below this are treated as zero (GB).
const VOLUME_EPSILON: f64 = 1e-9;

/// Packet priority. `Critical` is the most important and compares lowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataPriority {
    Critical,
    High,
    Medium,
    Low,
    Housekeeping,
}

impl DataPriority {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "CRITICAL" => Some(Self::Critical),
            "HIGH" => Some(Self::High),
            "MEDIUM" => Some(Self::Medium),
            "LOW" => Some(Self::Low),
            "HOUSEKEEPING" => Some(Self::Housekeeping),
            _ => None,
        }
    }
}

impl fmt::Display for DataPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
            Self::Housekeeping => "HOUSEKEEPING",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPacket {
    pub id: String,
    pub timestamp: Epoch,
    pub size_gb: f64,
    pub priority: DataPriority,
    pub source: String,
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Epoch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Fill,
    Drain,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageTransaction {
    pub timestamp: Epoch,
    pub kind: TransactionKind,
    pub volume_gb: f64,
    pub source: String,
    pub pre_level_gb: f64,
    pub post_level_gb: f64,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageStats {
    pub filled_gb: f64,
    pub drained_gb: f64,
    pub evicted_gb: f64,
    pub expired_gb: f64,
    /// Volume requested by fills that could not be stored.
    pub rejected_gb: f64,
    pub peak_used_gb: f64,
    pub packets_written: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FillOutcome {
    pub requested_gb: f64,
    pub stored_gb: f64,
    pub evicted_gb: f64,
    pub events: Vec<SimEvent>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrainOutcome {
    pub requested_gb: f64,
    pub drained_gb: f64,
    pub events: Vec<SimEvent>,
}

#[derive(Debug)]
pub struct StorageModel {
    capacity_gb: f64,
    reserved_gb: f64,
    warning_fraction: f64,
    seed: u64,
    rng: Pcg64Mcg,
    packets: Vec<DataPacket>,
    transactions: Vec<StorageTransaction>,
    stats: StorageStats,
}

impl StorageModel {
    pub fn new(config: &StorageConfig, seed: u64) -> Self {
        Self {
            capacity_gb: config.capacity_gb,
            reserved_gb: config.reserved_gb,
            warning_fraction: config.warning_fraction,
            seed,
            rng: Pcg64Mcg::new(u128::from(seed)),
            packets: Vec::new(),
            transactions: Vec::new(),
            stats: StorageStats::default(),
        }
    }

    pub fn capacity_gb(&self) -> f64 {
        self.capacity_gb
    }

    /// Capacity available to fills (total minus reserve).
    pub fn usable_capacity_gb(&self) -> f64 {
        self.capacity_gb - self.reserved_gb
    }

    pub fn used_gb(&self) -> f64 {
        self.packets.iter().map(|p| p.size_gb).sum()
    }

    pub fn free_gb(&self) -> f64 {
        (self.usable_capacity_gb() - self.used_gb()).max(0.0)
    }

    pub fn fill_fraction(&self) -> f64 {
        self.used_gb() / self.capacity_gb
    }

    pub fn packets(&self) -> &[DataPacket] {
        &self.packets
    }

    pub fn transactions(&self) -> &[StorageTransaction] {
        &self.transactions
    }

    pub fn stats(&self) -> StorageStats {
        self.stats
    }

    /// Stored volume per priority, most important first. Empty priorities are omitted.
    pub fn usage_by_priority(&self) -> Vec<(DataPriority, f64)> {
        let mut usage: Vec<(DataPriority, f64)> = Vec::new();
        for packet in &self.packets {
            match usage.iter_mut().find(|(p, _)| *p == packet.priority) {
                Some((_, volume)) => *volume += packet.size_gb,
                None => usage.push((packet.priority, packet.size_gb)),
            }
        }
        usage.sort_by_key(|(p, _)| *p);
        usage
    }

    /// Seed a packet list directly, as when chaining from a previous run's storage level.
    /// Volume beyond usable capacity is dropped with a warning.
    pub fn preload(&mut self, volume_gb: f64, timestamp: Epoch) -> Vec<SimEvent> {
        let mut events = Vec::new();
        if volume_gb <= VOLUME_EPSILON {
            return events;
        }
        let usable = self.usable_capacity_gb();
        let stored = volume_gb.min(usable);
        if volume_gb - stored > VOLUME_EPSILON {
            warn!(volume_gb, usable_gb = usable, "Preload exceeds usable capacity");
            events.push(SimEvent::warning(
                timestamp,
                EventCategory::Storage,
                format!(
                    "initial storage {volume_gb:.3} GB exceeds usable capacity {usable:.3} GB, {:.3} GB dropped",
                    volume_gb - stored
                ),
            ));
        }
        if stored > VOLUME_EPSILON {
            let packet = self.new_packet(
                timestamp,
                stored,
                DataPriority::Medium,
                "preload",
                "carried_over",
                None,
            );
            self.packets.push(packet);
            self.stats.peak_used_gb = self.stats.peak_used_gb.max(self.used_gb());
        }
        events
    }

    pub fn fill(
        &mut self,
        volume_gb: f64,
        timestamp: Epoch,
        source: &str,
        priority: DataPriority,
        data_type: &str,
    ) -> FillOutcome {
        self.fill_with_expiry(volume_gb, timestamp, source, priority, data_type, None)
    }

    pub fn fill_with_expiry(
        &mut self,
        volume_gb: f64,
        timestamp: Epoch,
        source: &str,
        priority: DataPriority,
        data_type: &str,
        expires_at: Option<Epoch>,
    ) -> FillOutcome {
        let requested_gb = volume_gb.max(0.0);
        let mut events = Vec::new();
        let evicted_gb = if requested_gb - self.free_gb() > VOLUME_EPSILON {
            self.evict_for(requested_gb, priority, timestamp, source)
        } else {
            0.0
        };

        let stored_gb = requested_gb.min(self.free_gb());
        let pre = self.used_gb();
        if stored_gb > VOLUME_EPSILON {
            let packet = self.new_packet(timestamp, stored_gb, priority, source, data_type, expires_at);
            debug!(id = %packet.id, size_gb = stored_gb, %priority, "Packet stored");
            self.packets.push(packet);
            self.stats.packets_written += 1;
        }
        let post = self.used_gb();
        let complete = requested_gb - stored_gb <= VOLUME_EPSILON;

        self.stats.filled_gb += stored_gb;
        self.stats.peak_used_gb = self.stats.peak_used_gb.max(post);
        self.transactions.push(StorageTransaction {
            timestamp,
            kind: TransactionKind::Fill,
            volume_gb: stored_gb,
            source: source.to_string(),
            pre_level_gb: pre,
            post_level_gb: post,
            success: complete,
            message: format!("{data_type} {priority}: stored {stored_gb:.3} of {requested_gb:.3} GB"),
        });

        if !complete {
            let lost = requested_gb - stored_gb;
            self.stats.rejected_gb += lost;
            warn!(source, lost_gb = lost, "Storage overflow");
            events.push(SimEvent::violation(
                timestamp,
                EventCategory::Storage,
                format!("storage overflow: {lost:.3} GB of {requested_gb:.3} GB from {source} not stored"),
            ));
        }
        let fraction = post / self.capacity_gb;
        if fraction > self.warning_fraction {
            events.push(SimEvent::warning(
                timestamp,
                EventCategory::Storage,
                format!("storage at {:.1}% of capacity", fraction * 100.0),
            ));
        }

        FillOutcome {
            requested_gb,
            stored_gb,
            evicted_gb,
            events,
        }
    }

    /// Delete whole packets of strictly lower priority than `incoming` until at least
    /// `needed_gb` has been released or no candidate remains. Least important go first,
    /// then oldest. Delete transactions are recorded in eviction order.
    fn evict_for(
        &mut self,
        needed_gb: f64,
        incoming: DataPriority,
        timestamp: Epoch,
        source: &str,
    ) -> f64 {
        let mut candidates: Vec<usize> = (0..self.packets.len())
            .filter(|&i| self.packets[i].priority > incoming)
            .collect();
        // Stable sort keeps insertion order among equal keys.
        candidates.sort_by(|&a, &b| {
            let (pa, pb) = (&self.packets[a], &self.packets[b]);
            pb.priority.cmp(&pa.priority).then(pa.timestamp.cmp(&pb.timestamp))
        });

        let mut freed = 0.0;
        let mut victims = Vec::new();
        for index in candidates {
            if freed + VOLUME_EPSILON >= needed_gb {
                break;
            }
            freed += self.packets[index].size_gb;
            victims.push(index);
        }

        let mut level = self.used_gb();
        for &index in &victims {
            let packet = &self.packets[index];
            self.transactions.push(StorageTransaction {
                timestamp,
                kind: TransactionKind::Delete,
                volume_gb: packet.size_gb,
                source: source.to_string(),
                pre_level_gb: level,
                post_level_gb: level - packet.size_gb,
                success: true,
                message: format!("evicted {} ({}) for {incoming} data", packet.id, packet.priority),
            });
            level -= packet.size_gb;
        }

        victims.sort_unstable();
        for index in victims.into_iter().rev() {
            self.packets.remove(index);
        }
        self.stats.evicted_gb += freed;
        freed
    }

    pub fn drain(
        &mut self,
        volume_gb: f64,
        timestamp: Epoch,
        source: &str,
        priority_order: bool,
    ) -> DrainOutcome {
        let requested_gb = volume_gb.max(0.0);
        let pre = self.used_gb();
        let mut remaining = requested_gb.min(pre);

        let mut order: Vec<usize> = (0..self.packets.len()).collect();
        if priority_order {
            order.sort_by_key(|&i| self.packets[i].priority);
        }

        let mut emptied = Vec::new();
        for index in order {
            if remaining <= VOLUME_EPSILON {
                break;
            }
            let packet = &mut self.packets[index];
            if packet.size_gb <= remaining + VOLUME_EPSILON {
                remaining -= packet.size_gb;
                emptied.push(index);
            } else {
                packet.size_gb -= remaining;
                remaining = 0.0;
            }
        }
        emptied.sort_unstable();
        for index in emptied.into_iter().rev() {
            self.packets.remove(index);
        }

        let post = self.used_gb();
        let drained_gb = pre - post;
        self.stats.drained_gb += drained_gb;
        self.transactions.push(StorageTransaction {
            timestamp,
            kind: TransactionKind::Drain,
            volume_gb: drained_gb,
            source: source.to_string(),
            pre_level_gb: pre,
            post_level_gb: post,
            success: true,
            message: format!("drained {drained_gb:.3} of {requested_gb:.3} GB requested"),
        });

        let mut events = Vec::new();
        if pre <= VOLUME_EPSILON && requested_gb > VOLUME_EPSILON {
            events.push(SimEvent::info(
                timestamp,
                EventCategory::Storage,
                format!("downlink {source} found the recorder empty"),
            ));
        }

        DrainOutcome {
            requested_gb,
            drained_gb,
            events,
        }
    }

    /// Delete every packet whose expiry is at or before `now`. Returns the deleted volume.
    pub fn purge_expired(&mut self, now: Epoch) -> f64 {
        let mut purged = 0.0;
        let mut index = 0;
        while index < self.packets.len() {
            let expired = self.packets[index].expires_at.is_some_and(|t| t <= now);
            if !expired {
                index += 1;
                continue;
            }
            let pre = self.used_gb();
            let packet = self.packets.remove(index);
            purged += packet.size_gb;
            self.transactions.push(StorageTransaction {
                timestamp: now,
                kind: TransactionKind::Delete,
                volume_gb: packet.size_gb,
                source: packet.source.clone(),
                pre_level_gb: pre,
                post_level_gb: pre - packet.size_gb,
                success: true,
                message: format!("expired {}", packet.id),
            });
        }
        self.stats.expired_gb += purged;
        purged
    }

    /// Drop all packets, transactions and statistics; restart packet ids from the seed.
    pub fn reset(&mut self) {
        self.packets.clear();
        self.transactions.clear();
        self.stats = StorageStats::default();
        self.rng = Pcg64Mcg::new(u128::from(self.seed));
    }

    fn new_packet(
        &mut self,
        timestamp: Epoch,
        size_gb: f64,
        priority: DataPriority,
        source: &str,
        data_type: &str,
        expires_at: Option<Epoch>,
    ) -> DataPacket {
        DataPacket {
            id: format!("pkt-{:016x}", self.rng.next_u64()),
            timestamp,
            size_gb,
            priority,
            source: source.to_string(),
            data_type: data_type.to_string(),
            expires_at,
        }
    }
}
