//! Corner-trigger safety interlock for live desktop input.
//!
//! While a desktop action is in flight a poll task samples the real cursor.
//! The moment it lands in any screen corner the guard fires, the in-flight
//! action is dropped and the session ends `aborted`.
//!
//! # Invariants
//! - armed only for the lifetime of one [`SafetyGuard`]; dropping it disarms
//! - the poll runs on its own task so it can interrupt a blocked input call

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::backend::BackendError;
use crate::geometry::{AbsolutePoint, SurfaceGeometry};

/// Reads the live pointer position.
#[async_trait]
pub trait CursorProbe: Send + Sync {
    async fn cursor_position(&self) -> Result<AbsolutePoint, BackendError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySettings {
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// Edge length of the square trigger zone in each corner.
    pub zone_px: i32,
}

impl Default for SafetySettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            zone_px: 5,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyState {
    Disarmed,
    Armed,
    Triggered,
}

const DISARMED: u8 = 0;
const ARMED: u8 = 1;
const TRIGGERED: u8 = 2;

/// Whether `point` lies in one of the four corner zones of `geometry`.
pub fn in_corner(point: AbsolutePoint, geometry: &SurfaceGeometry, zone_px: i32) -> bool {
    let left = point.x - geometry.origin_x;
    let right = geometry.origin_x + geometry.width_px - 1 - point.x;
    let top = point.y - geometry.origin_y;
    let bottom = geometry.origin_y + geometry.height_px - 1 - point.y;
    let near_x = left < zone_px || right < zone_px;
    let near_y = top < zone_px || bottom < zone_px;
    near_x && near_y
}

/// Factory for per-action guards. Holds no armed state itself.
#[derive(Debug, Clone, Default)]
pub struct SafetyMonitor {
    settings: SafetySettings,
}

impl SafetyMonitor {
    pub fn new(settings: SafetySettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SafetySettings {
        &self.settings
    }

    /// Arm for one action on `geometry`, sampling through `probe`.
    pub fn arm(&self, probe: Arc<dyn CursorProbe>, geometry: SurfaceGeometry) -> SafetyGuard {
        let fired = CancellationToken::new();
        let state = Arc::new(AtomicU8::new(ARMED));
        let interval = self.settings.poll_interval;
        let zone = self.settings.zone_px;

        let poller = {
            let fired = fired.clone();
            let state = state.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    match probe.cursor_position().await {
                        Ok(pos) if in_corner(pos, &geometry, zone) => {
                            tracing::warn!(x = pos.x, y = pos.y, "Safety corner triggered");
                            state.store(TRIGGERED, Ordering::SeqCst);
                            fired.cancel();
                            return;
                        }
                        Ok(_) => {}
                        Err(e) => tracing::debug!("Cursor probe failed: {}", e),
                    }
                }
            })
        };

        tracing::debug!(
            width = geometry.width_px,
            height = geometry.height_px,
            "Safety monitor armed"
        );

        SafetyGuard {
            fired,
            state,
            poller,
        }
    }
}

/// Live arming for exactly one in-flight action.
pub struct SafetyGuard {
    fired: CancellationToken,
    state: Arc<AtomicU8>,
    poller: JoinHandle<()>,
}

impl SafetyGuard {
    /// Resolves once the corner trigger fires.
    pub async fn triggered(&self) {
        self.fired.cancelled().await
    }

    pub fn is_triggered(&self) -> bool {
        self.fired.is_cancelled()
    }

    pub fn state(&self) -> SafetyState {
        match self.state.load(Ordering::SeqCst) {
            ARMED => SafetyState::Armed,
            TRIGGERED => SafetyState::Triggered,
            _ => SafetyState::Disarmed,
        }
    }
}

impl Drop for SafetyGuard {
    fn drop(&mut self) {
        self.poller.abort();
        self.state.store(DISARMED, Ordering::SeqCst);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Cursor that replays a script of positions, then holds the last one.
    pub struct ScriptedCursor {
        positions: Mutex<Vec<AbsolutePoint>>,
    }

    impl ScriptedCursor {
        pub fn new(mut positions: Vec<AbsolutePoint>) -> Self {
            positions.reverse();
            Self {
                positions: Mutex::new(positions),
            }
        }
    }

    #[async_trait]
    impl CursorProbe for ScriptedCursor {
        async fn cursor_position(&self) -> Result<AbsolutePoint, BackendError> {
            let mut positions = self.positions.lock().unwrap();
            let pos = if positions.len() > 1 {
                positions.pop()
            } else {
                positions.last().copied()
            };
            pos.ok_or_else(|| BackendError::Unavailable("no cursor".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedCursor;
    use super::*;

    fn screen() -> SurfaceGeometry {
        SurfaceGeometry::new(1920, 1080)
    }

    #[test]
    fn test_corner_zones() {
        let g = screen();
        assert!(in_corner(AbsolutePoint::new(0, 0), &g, 5));
        assert!(in_corner(AbsolutePoint::new(4, 1079), &g, 5));
        assert!(in_corner(AbsolutePoint::new(1919, 0), &g, 5));
        assert!(in_corner(AbsolutePoint::new(1915, 1075), &g, 5));
        assert!(!in_corner(AbsolutePoint::new(5, 0), &g, 5));
        assert!(!in_corner(AbsolutePoint::new(960, 0), &g, 5));
        assert!(!in_corner(AbsolutePoint::new(0, 540), &g, 5));
    }

    #[test]
    fn test_corner_zones_respect_origin() {
        let g = SurfaceGeometry::new(1920, 1080).with_origin(-1920, 0);
        assert!(in_corner(AbsolutePoint::new(-1920, 0), &g, 5));
        assert!(!in_corner(AbsolutePoint::new(0, 0), &g, 5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_fires_when_cursor_reaches_corner() {
        let probe = Arc::new(ScriptedCursor::new(vec![
            AbsolutePoint::new(500, 500),
            AbsolutePoint::new(900, 10),
            AbsolutePoint::new(1, 2),
        ]));
        let guard = SafetyMonitor::default().arm(probe, screen());
        assert_eq!(guard.state(), SafetyState::Armed);
        tokio::time::timeout(Duration::from_secs(1), guard.triggered())
            .await
            .unwrap();
        assert!(guard.is_triggered());
        assert_eq!(guard.state(), SafetyState::Triggered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_stays_quiet_away_from_corners() {
        let probe = Arc::new(ScriptedCursor::new(vec![AbsolutePoint::new(960, 540)]));
        let guard = SafetyMonitor::default().arm(probe, screen());
        let fired = tokio::time::timeout(Duration::from_secs(2), guard.triggered()).await;
        assert!(fired.is_err());
        assert!(!guard.is_triggered());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_disarms() {
        let probe = Arc::new(ScriptedCursor::new(vec![AbsolutePoint::new(960, 540)]));
        let guard = SafetyMonitor::default().arm(probe, screen());
        let state = guard.state.clone();
        drop(guard);
        assert_eq!(state.load(Ordering::SeqCst), DISARMED);
    }
}
