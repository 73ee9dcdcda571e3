//! Leader schedule trait definition

/// Decides the order in which nodes are offered the leader slot.
///
/// The coordinator walks the returned order and takes the first node whose
/// chain validates, so the schedule only needs to be deterministic for a
/// given `now_ms`.
pub trait LeaderSchedule: Send + Sync {
    fn candidates(&self, now_ms: i64, interval_ms: i64, node_count: usize) -> Vec<usize>;

    fn name(&self) -> &str;
}

/// `floor(now / interval) mod n`, then each following node in turn.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoundRobinSchedule;

impl LeaderSchedule for RoundRobinSchedule {
    fn candidates(&self, now_ms: i64, interval_ms: i64, node_count: usize) -> Vec<usize> {
        if node_count == 0 {
            return Vec::new();
        }
        let slot = now_ms.div_euclid(interval_ms.max(1));
        let start = slot.rem_euclid(node_count as i64) as usize;
        (0..node_count).map(|k| (start + k) % node_count).collect()
    }

    fn name(&self) -> &str {
        "round-robin"
    }
}
