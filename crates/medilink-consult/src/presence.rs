//! Shared presence document per consultation.
//!
//! One record per appointment holds both parties' join leases and the
//! running transcript. Presence is a lease, not a flag: a participant
//! counts as present only while its lease is fresh, so a crashed client
//! goes stale instead of haunting the room forever. The transcript append
//! is store-side and serialized, so two parties writing at once never
//! clobber each other.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info};

use medilink_core::{ClinicError, ClinicResult, ParticipantRole};

const PRESENCE_CHANNEL_CAPACITY: usize = 64;

pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// One participant's join lease.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct PresenceLease {
    pub joined: bool,
    /// Last heartbeat, epoch millis. Zero means never joined.
    pub renewed_at_ms: i64,
}

impl PresenceLease {
    /// A lease counts only while it is joined and recently renewed.
    pub fn is_fresh(&self, now_ms: i64, ttl: Duration) -> bool {
        self.joined && now_ms.saturating_sub(self.renewed_at_ms) < ttl.as_millis() as i64
    }
}

/// The shared per-appointment presence document.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct PresenceRecord {
    pub appointment_id: i64,
    pub doctor: PresenceLease,
    pub patient: PresenceLease,
    pub transcript: String,
}

impl PresenceRecord {
    pub fn lease(&self, role: ParticipantRole) -> &PresenceLease {
        match role {
            ParticipantRole::Doctor => &self.doctor,
            ParticipantRole::Patient => &self.patient,
        }
    }

    fn lease_mut(&mut self, role: ParticipantRole) -> &mut PresenceLease {
        match role {
            ParticipantRole::Doctor => &mut self.doctor,
            ParticipantRole::Patient => &mut self.patient,
        }
    }

    /// Both parties hold fresh leases right now.
    pub fn both_present(&self, now_ms: i64, ttl: Duration) -> bool {
        self.doctor.is_fresh(now_ms, ttl) && self.patient.is_fresh(now_ms, ttl)
    }
}

/// Store of live presence documents.
///
/// `subscribe` delivers a full snapshot after every mutation; observers
/// diff snapshots instead of tracking field-level updates, so a lagged
/// observer can always resync from `get`.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn get(&self, appointment_id: i64) -> ClinicResult<PresenceRecord>;

    /// Join (or rejoin) the room. A record whose leases have all gone
    /// stale is wiped first, so a rebooked appointment id cannot inherit
    /// a live-looking document from an earlier visit.
    async fn mark_joined(
        &self,
        appointment_id: i64,
        role: ParticipantRole,
    ) -> ClinicResult<PresenceRecord>;

    /// Heartbeat. A no-op unless the caller is currently joined.
    async fn renew(&self, appointment_id: i64, role: ParticipantRole) -> ClinicResult<()>;

    /// Leave the room. Leaving twice (or a missing record) is not an error.
    async fn mark_left(&self, appointment_id: i64, role: ParticipantRole) -> ClinicResult<()>;

    /// Append one transcript line, store-side and atomic. Lines are
    /// separated by a single newline.
    async fn append_line(&self, appointment_id: i64, line: &str) -> ClinicResult<PresenceRecord>;

    /// Snapshot feed for the appointment's presence document.
    fn subscribe(&self, appointment_id: i64) -> broadcast::Receiver<PresenceRecord>;
}

struct PresenceEntry {
    record: PresenceRecord,
    tx: broadcast::Sender<PresenceRecord>,
}

impl PresenceEntry {
    fn new(appointment_id: i64) -> Self {
        let (tx, _) = broadcast::channel(PRESENCE_CHANNEL_CAPACITY);
        Self {
            record: PresenceRecord {
                appointment_id,
                ..Default::default()
            },
            tx,
        }
    }

    fn publish(&self) {
        let _ = self.tx.send(self.record.clone());
    }
}

/// In-process [`PresenceStore`] over a concurrent map. One clinic node's
/// worth of live rooms; the SQLite cache stays the durable record.
pub struct MemoryPresenceStore {
    records: DashMap<i64, PresenceEntry>,
    ttl: Duration,
}

impl MemoryPresenceStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: DashMap::new(),
            ttl,
        }
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn get(&self, appointment_id: i64) -> ClinicResult<PresenceRecord> {
        Ok(self
            .records
            .entry(appointment_id)
            .or_insert_with(|| PresenceEntry::new(appointment_id))
            .record
            .clone())
    }

    async fn mark_joined(
        &self,
        appointment_id: i64,
        role: ParticipantRole,
    ) -> ClinicResult<PresenceRecord> {
        if appointment_id <= 0 {
            return Err(ClinicError::InvalidAppointmentId(appointment_id));
        }
        let now = now_ms();
        let mut entry = self
            .records
            .entry(appointment_id)
            .or_insert_with(|| PresenceEntry::new(appointment_id));

        let record = &mut entry.record;
        let leftover =
            record.doctor.joined || record.patient.joined || !record.transcript.is_empty();
        if leftover
            && !record.doctor.is_fresh(now, self.ttl)
            && !record.patient.is_fresh(now, self.ttl)
        {
            info!(
                target: "medilink::presence",
                appointment_id,
                "Stale presence record reset"
            );
            *record = PresenceRecord {
                appointment_id,
                ..Default::default()
            };
        }

        let lease = record.lease_mut(role);
        lease.joined = true;
        lease.renewed_at_ms = now;
        info!(
            target: "medilink::presence",
            appointment_id,
            role = role.as_str(),
            "Participant joined"
        );
        let snapshot = record.clone();
        entry.publish();
        Ok(snapshot)
    }

    async fn renew(&self, appointment_id: i64, role: ParticipantRole) -> ClinicResult<()> {
        if let Some(mut entry) = self.records.get_mut(&appointment_id) {
            let lease = entry.record.lease_mut(role);
            if lease.joined {
                lease.renewed_at_ms = now_ms();
                debug!(
                    target: "medilink::presence",
                    appointment_id,
                    role = role.as_str(),
                    "Lease renewed"
                );
                entry.publish();
            }
        }
        Ok(())
    }

    async fn mark_left(&self, appointment_id: i64, role: ParticipantRole) -> ClinicResult<()> {
        if let Some(mut entry) = self.records.get_mut(&appointment_id) {
            let lease = entry.record.lease_mut(role);
            if lease.joined {
                lease.joined = false;
                info!(
                    target: "medilink::presence",
                    appointment_id,
                    role = role.as_str(),
                    "Participant left"
                );
                entry.publish();
            }
        }
        Ok(())
    }

    async fn append_line(&self, appointment_id: i64, line: &str) -> ClinicResult<PresenceRecord> {
        let line = line.trim();
        let mut entry = self
            .records
            .entry(appointment_id)
            .or_insert_with(|| PresenceEntry::new(appointment_id));
        if !line.is_empty() {
            let transcript = &mut entry.record.transcript;
            if !transcript.is_empty() {
                transcript.push('\n');
            }
            transcript.push_str(line);
            let snapshot = entry.record.clone();
            entry.publish();
            return Ok(snapshot);
        }
        Ok(entry.record.clone())
    }

    fn subscribe(&self, appointment_id: i64) -> broadcast::Receiver<PresenceRecord> {
        self.records
            .entry(appointment_id)
            .or_insert_with(|| PresenceEntry::new(appointment_id))
            .tx
            .subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(45);

    #[test]
    fn test_lease_freshness_window() {
        let lease = PresenceLease {
            joined: true,
            renewed_at_ms: 100_000,
        };
        let ttl_ms = TTL.as_millis() as i64;
        assert!(lease.is_fresh(100_000 + ttl_ms - 1, TTL));
        // Exactly the TTL is already stale.
        assert!(!lease.is_fresh(100_000 + ttl_ms, TTL));

        let unjoined = PresenceLease {
            joined: false,
            renewed_at_ms: 100_000,
        };
        assert!(!unjoined.is_fresh(100_001, TTL));
    }

    #[tokio::test]
    async fn test_append_preserves_order_and_separators() {
        let store = MemoryPresenceStore::new(TTL);
        store.append_line(5, " Dr: hello ").await.unwrap();
        let rec = store.append_line(5, "Pt: hi").await.unwrap();
        assert_eq!(rec.transcript, "Dr: hello\nPt: hi");

        // Blank lines disappear instead of adding separators.
        let rec = store.append_line(5, "   ").await.unwrap();
        assert_eq!(rec.transcript, "Dr: hello\nPt: hi");
    }

    #[tokio::test]
    async fn test_stale_record_resets_on_rejoin() {
        let store = MemoryPresenceStore::new(Duration::from_millis(30));
        store.mark_joined(9, ParticipantRole::Doctor).await.unwrap();
        store.append_line(9, "Dr: old visit").await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let rec = store.mark_joined(9, ParticipantRole::Patient).await.unwrap();
        assert!(rec.patient.joined);
        assert!(!rec.doctor.joined, "stale doctor lease survived the reset");
        assert_eq!(rec.transcript, "");
    }

    #[tokio::test]
    async fn test_fresh_record_survives_second_join() {
        let store = MemoryPresenceStore::new(TTL);
        store.mark_joined(4, ParticipantRole::Doctor).await.unwrap();
        store.append_line(4, "Dr: first line").await.unwrap();

        let rec = store.mark_joined(4, ParticipantRole::Patient).await.unwrap();
        assert!(rec.doctor.joined && rec.patient.joined);
        assert_eq!(rec.transcript, "Dr: first line");
        assert!(rec.both_present(now_ms(), TTL));
    }

    #[tokio::test]
    async fn test_mark_left_missing_record_is_ok() {
        let store = MemoryPresenceStore::new(TTL);
        assert!(store.mark_left(404, ParticipantRole::Doctor).await.is_ok());
    }

    #[tokio::test]
    async fn test_renew_requires_join() {
        let store = MemoryPresenceStore::new(TTL);
        store.renew(3, ParticipantRole::Doctor).await.unwrap();
        assert_eq!(store.get(3).await.unwrap().doctor.renewed_at_ms, 0);

        store.mark_joined(3, ParticipantRole::Doctor).await.unwrap();
        store.renew(3, ParticipantRole::Doctor).await.unwrap();
        assert!(store.get(3).await.unwrap().doctor.renewed_at_ms > 0);
    }

    #[tokio::test]
    async fn test_zero_appointment_id_rejected() {
        let store = MemoryPresenceStore::new(TTL);
        assert!(matches!(
            store.mark_joined(0, ParticipantRole::Patient).await,
            Err(ClinicError::InvalidAppointmentId(0))
        ));
    }

    #[tokio::test]
    async fn test_subscribers_see_mutations() {
        let store = MemoryPresenceStore::new(TTL);
        let mut rx = store.subscribe(2);
        store.mark_joined(2, ParticipantRole::Doctor).await.unwrap();
        let snap = rx.recv().await.unwrap();
        assert!(snap.doctor.joined);

        store.append_line(2, "Dr: good morning").await.unwrap();
        let snap = rx.recv().await.unwrap();
        assert_eq!(snap.transcript, "Dr: good morning");
    }
}
