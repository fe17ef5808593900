// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-device motion control.
//!
//! Each move opens (or reuses) a control session, starts a continuous move
//! and arms an auto-stop timer. A new move on the same device replaces the
//! pending timer, so a burst of commands produces exactly one stop, timed
//! from the last command.
//!
//! All operations on a device run under its motion lock. Cancel, reschedule
//! and timer fire therefore never interleave on one device.

use crate::config::MotionConfig;
use crate::registry::Device;
use crate::session::{ControlSession, Credentials, SessionError, SessionProvider, Velocity};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;

/// Handle to a pending auto-stop.
#[derive(Debug)]
pub struct StopTimer {
    generation: u64,
    handle: AbortHandle,
}

impl StopTimer {
    fn cancel(self) {
        self.handle.abort();
    }
}

/// Motion state of one device.
#[derive(Debug)]
pub enum MotionState<S> {
    /// No motion. Keeps the last session for reuse.
    Idle { session: Option<Arc<S>> },
    /// A session is being established.
    SessionPending,
    /// A move command is being sent.
    Moving { session: Arc<S> },
    /// Moving, with an auto-stop armed.
    StopScheduled { session: Arc<S>, timer: StopTimer },
}

impl<S> Default for MotionState<S> {
    fn default() -> Self {
        Self::Idle { session: None }
    }
}

impl<S> MotionState<S> {
    pub fn phase(&self) -> MotionPhase {
        match self {
            Self::Idle { session } => MotionPhase::Idle {
                has_session: session.is_some(),
            },
            Self::SessionPending => MotionPhase::SessionPending,
            Self::Moving { .. } => MotionPhase::Moving,
            Self::StopScheduled { .. } => MotionPhase::StopScheduled,
        }
    }

    fn session(&self) -> Option<&Arc<S>> {
        match self {
            Self::Idle { session } => session.as_ref(),
            Self::SessionPending => None,
            Self::Moving { session } | Self::StopScheduled { session, .. } => Some(session),
        }
    }

    /// Leave `SessionPending` behind, cancel any armed stop and hand back the
    /// session for reuse.
    fn take_session(&mut self) -> Option<Arc<S>> {
        match std::mem::replace(self, Self::SessionPending) {
            Self::Idle { session } => session,
            Self::SessionPending => None,
            Self::Moving { session } => Some(session),
            Self::StopScheduled { session, timer } => {
                timer.cancel();
                Some(session)
            }
        }
    }
}

/// Observable summary of a [`MotionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionPhase {
    Idle { has_session: bool },
    SessionPending,
    Moving,
    StopScheduled,
}

/// Result of one move request.
#[derive(Debug)]
pub enum MoveOutcome {
    /// Moving at `velocity` (after inversion); stops after `stop_in`.
    Moving { velocity: Velocity, stop_in: Duration },
    /// The device record has no control endpoint.
    NoEndpoint,
    /// No session could be opened.
    SessionUnavailable(SessionError),
    /// An open session exists with other credentials. Nothing was sent.
    CredentialMismatch,
    /// The move command failed. The session is dropped, no stop is armed.
    CommandFailed(SessionError),
}

impl MoveOutcome {
    pub fn is_moving(&self) -> bool {
        matches!(self, Self::Moving { .. })
    }
}

/// Drives moves and auto-stops through a [`SessionProvider`].
pub struct MotionController<P> {
    provider: P,
    session_timeout: Duration,
    timers: AtomicU64,
}

impl<P: SessionProvider> MotionController<P> {
    pub fn new(provider: P, config: &MotionConfig) -> Self {
        Self {
            provider,
            session_timeout: config.session_timeout(),
            timers: AtomicU64::new(0),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Move `device` at `velocity` and stop it after `stop_after`.
    pub async fn move_device(
        &self,
        device: &Arc<Device<P::Session>>,
        velocity: Velocity,
        stop_after: Duration,
        credentials: &Credentials,
    ) -> MoveOutcome {
        let mut state = device.motion().lock().await;
        let record = device.record();
        let endpoint = record.control_endpoint();

        let live = state
            .session()
            .filter(|session| Some(session.endpoint()) == endpoint);
        if let Some(session) = live {
            if session.credentials() != credentials {
                return MoveOutcome::CredentialMismatch;
            }
        }

        let reused = state.take_session().filter(|session| {
            let current = Some(session.endpoint()) == endpoint;
            if !current {
                tracing::debug!(
                    device = %record.identifier,
                    stale = session.endpoint(),
                    "Dropping session opened against a previous endpoint"
                );
            }
            current
        });
        let session = match reused {
            Some(session) => session,
            None => {
                let Some(endpoint) = endpoint else {
                    *state = MotionState::Idle { session: None };
                    return MoveOutcome::NoEndpoint;
                };

                tracing::debug!(device = %record.identifier, %endpoint, "Opening control session");
                let opened = tokio::time::timeout(
                    self.session_timeout,
                    self.provider.open(endpoint, credentials),
                )
                .await
                .unwrap_or(Err(SessionError::Timeout));

                match opened {
                    Ok(session) => Arc::new(session),
                    Err(e) => {
                        *state = MotionState::Idle { session: None };
                        return MoveOutcome::SessionUnavailable(e);
                    }
                }
            }
        };

        let velocity = velocity.inverted(record.invert_horizontal, record.invert_vertical);
        *state = MotionState::Moving {
            session: Arc::clone(&session),
        };

        if let Err(e) = session.continuous_move(velocity).await {
            *state = MotionState::Idle { session: None };
            return MoveOutcome::CommandFailed(e);
        }

        let timer = self.arm_stop(Arc::clone(device), stop_after);
        *state = MotionState::StopScheduled { session, timer };

        MoveOutcome::Moving {
            velocity,
            stop_in: stop_after,
        }
    }

    fn arm_stop(&self, device: Arc<Device<P::Session>>, after: Duration) -> StopTimer {
        let generation = self.timers.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            fire_stop(&device, generation).await;
        })
        .abort_handle();

        StopTimer { generation, handle }
    }
}

async fn fire_stop<S: ControlSession>(device: &Device<S>, generation: u64) {
    let mut state = device.motion().lock().await;

    let current = matches!(
        &*state,
        MotionState::StopScheduled { timer, .. } if timer.generation == generation
    );
    if !current {
        return;
    }

    let MotionState::StopScheduled { session, .. } = std::mem::take(&mut *state) else {
        return;
    };
    *state = MotionState::Idle {
        session: Some(Arc::clone(&session)),
    };

    let identifier = device.identifier();
    match session.stop().await {
        Ok(()) => tracing::debug!(device = %identifier, "Auto-stop sent"),
        Err(e) => tracing::warn!(device = %identifier, "Auto-stop failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceRecord;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Open(String),
        Move(Velocity),
        Stop,
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(Instant, Call)>>,
        fail_open: Mutex<bool>,
        fail_move: Mutex<bool>,
        hang_open: Mutex<bool>,
    }

    impl Recorder {
        fn push(&self, call: Call) {
            self.calls.lock().push((Instant::now(), call));
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().iter().map(|(_, c)| c.clone()).collect()
        }

        fn opens(&self) -> Vec<String> {
            self.calls
                .lock()
                .iter()
                .filter_map(|(_, c)| match c {
                    Call::Open(endpoint) => Some(endpoint.clone()),
                    _ => None,
                })
                .collect()
        }

        fn stops(&self) -> Vec<Instant> {
            self.calls
                .lock()
                .iter()
                .filter(|(_, c)| *c == Call::Stop)
                .map(|(at, _)| *at)
                .collect()
        }
    }

    struct FakeSession {
        endpoint: String,
        credentials: Credentials,
        recorder: Arc<Recorder>,
    }

    impl ControlSession for FakeSession {
        fn endpoint(&self) -> &str {
            &self.endpoint
        }

        fn credentials(&self) -> &Credentials {
            &self.credentials
        }

        async fn continuous_move(&self, velocity: Velocity) -> Result<(), SessionError> {
            self.recorder.push(Call::Move(velocity));
            if *self.recorder.fail_move.lock() {
                return Err(SessionError::Rejected("busy".into()));
            }
            Ok(())
        }

        async fn stop(&self) -> Result<(), SessionError> {
            self.recorder.push(Call::Stop);
            Ok(())
        }
    }

    struct FakeProvider(Arc<Recorder>);

    impl SessionProvider for FakeProvider {
        type Session = FakeSession;

        async fn open(
            &self,
            endpoint: &str,
            credentials: &Credentials,
        ) -> Result<FakeSession, SessionError> {
            self.0.push(Call::Open(endpoint.to_string()));
            if *self.0.hang_open.lock() {
                std::future::pending::<()>().await;
            }
            if *self.0.fail_open.lock() {
                return Err(SessionError::Transport("connection refused".into()));
            }
            Ok(FakeSession {
                endpoint: endpoint.to_string(),
                credentials: credentials.clone(),
                recorder: Arc::clone(&self.0),
            })
        }
    }

    const ENDPOINT: &str = "http://10.0.0.2/onvif/device_service";

    fn setup() -> (MotionController<FakeProvider>, Arc<Recorder>, Arc<Device<FakeSession>>) {
        let recorder = Arc::new(Recorder::default());
        let controller = MotionController::new(
            FakeProvider(Arc::clone(&recorder)),
            &MotionConfig::default(),
        );
        let mut record = DeviceRecord::new("urn:uuid:cam");
        record.xaddrs = ENDPOINT.into();
        (controller, recorder, Arc::new(Device::new(record)))
    }

    fn admin() -> Credentials {
        Credentials::new("admin", "secret")
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_then_auto_stop() {
        let (controller, recorder, device) = setup();
        let start = Instant::now();

        let outcome = controller
            .move_device(&device, Velocity::new(0.0, 1.0), Duration::from_millis(500), &admin())
            .await;
        assert!(outcome.is_moving());
        assert_eq!(device.phase().await, MotionPhase::StopScheduled);

        tokio::time::sleep(Duration::from_millis(499)).await;
        assert!(recorder.stops().is_empty());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(recorder.stops(), vec![start + Duration::from_millis(500)]);
        assert_eq!(
            recorder.calls(),
            vec![
                Call::Open(ENDPOINT.into()),
                Call::Move(Velocity::new(0.0, 1.0)),
                Call::Stop
            ]
        );
        assert_eq!(
            device.phase().await,
            MotionPhase::Idle { has_session: true }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_moves_debounce_to_one_stop() {
        let (controller, recorder, device) = setup();

        for _ in 0..5 {
            controller
                .move_device(&device, Velocity::new(1.0, 0.0), Duration::from_millis(1000), &admin())
                .await;
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        let last_move = Instant::now() - Duration::from_millis(200);

        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(recorder.stops(), vec![last_move + Duration::from_millis(1000)]);
        // The session is opened once and reused.
        let opens = recorder
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Open(_)))
            .count();
        assert_eq!(opens, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inversion_applied() {
        let (controller, recorder, device) = setup();
        let mut record = device.record();
        record.invert_horizontal = true;
        device.update(record);

        let outcome = controller
            .move_device(&device, Velocity::new(1.0, 0.0), Duration::from_millis(100), &admin())
            .await;

        assert!(matches!(
            outcome,
            MoveOutcome::Moving { velocity, .. } if velocity == Velocity::new(-1.0, 0.0)
        ));
        assert!(recorder.calls().contains(&Call::Move(Velocity::new(-1.0, 0.0))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_credential_mismatch_leaves_state() {
        let (controller, recorder, device) = setup();
        controller
            .move_device(&device, Velocity::new(0.0, -1.0), Duration::from_millis(800), &admin())
            .await;
        let before = recorder.calls();

        let outcome = controller
            .move_device(
                &device,
                Velocity::new(0.0, 1.0),
                Duration::from_millis(800),
                &Credentials::new("guest", "guest"),
            )
            .await;

        assert!(matches!(outcome, MoveOutcome::CredentialMismatch));
        assert_eq!(recorder.calls(), before);
        assert_eq!(device.phase().await, MotionPhase::StopScheduled);

        // The first stop still fires.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(recorder.stops().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_failure() {
        let (controller, recorder, device) = setup();
        *recorder.fail_open.lock() = true;

        let outcome = controller
            .move_device(&device, Velocity::new(0.0, 1.0), Duration::from_millis(100), &admin())
            .await;

        assert!(matches!(
            outcome,
            MoveOutcome::SessionUnavailable(SessionError::Transport(_))
        ));
        assert_eq!(
            device.phase().await,
            MotionPhase::Idle { has_session: false }
        );
        assert_eq!(recorder.calls(), vec![Call::Open(ENDPOINT.into())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_open_times_out() {
        let (controller, recorder, device) = setup();
        *recorder.hang_open.lock() = true;

        let outcome = controller
            .move_device(&device, Velocity::new(0.0, 1.0), Duration::from_millis(100), &admin())
            .await;

        assert!(matches!(
            outcome,
            MoveOutcome::SessionUnavailable(SessionError::Timeout)
        ));
        assert_eq!(
            device.phase().await,
            MotionPhase::Idle { has_session: false }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_failure_drops_session_without_timer() {
        let (controller, recorder, device) = setup();
        *recorder.fail_move.lock() = true;

        let outcome = controller
            .move_device(&device, Velocity::new(0.0, 1.0), Duration::from_millis(100), &admin())
            .await;

        assert!(matches!(outcome, MoveOutcome::CommandFailed(_)));
        assert_eq!(
            device.phase().await,
            MotionPhase::Idle { has_session: false }
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(recorder.stops().is_empty());

        // The next move opens a fresh session.
        *recorder.fail_move.lock() = false;
        let outcome = controller
            .move_device(&device, Velocity::new(0.0, 1.0), Duration::from_millis(100), &admin())
            .await;
        assert!(outcome.is_moving());
        assert_eq!(recorder.opens(), vec![ENDPOINT.to_string(), ENDPOINT.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_endpoint_change_reopens_session() {
        let (controller, recorder, device) = setup();
        controller
            .move_device(&device, Velocity::new(1.0, 0.0), Duration::from_millis(100), &admin())
            .await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            device.phase().await,
            MotionPhase::Idle { has_session: true }
        );

        let moved = "http://10.0.0.9/onvif/device_service";
        let mut record = device.record();
        record.xaddrs = moved.into();
        device.update(record);

        // Other credentials are not a mismatch against a session for the old address.
        let other = Credentials::new("operator", "pw");
        for _ in 0..3 {
            let outcome = controller
                .move_device(&device, Velocity::new(1.0, 0.0), Duration::from_millis(100), &other)
                .await;
            assert!(outcome.is_moving());
        }

        assert_eq!(recorder.opens(), vec![ENDPOINT.to_string(), moved.to_string()]);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(recorder.stops().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_without_endpoint() {
        let (controller, recorder, _) = setup();
        let device = Arc::new(Device::new(DeviceRecord::new("urn:uuid:offline")));

        let outcome = controller
            .move_device(&device, Velocity::new(0.0, 1.0), Duration::from_millis(100), &admin())
            .await;

        assert!(matches!(outcome, MoveOutcome::NoEndpoint));
        assert!(recorder.calls().is_empty());
    }
}
