// ============================
// reflights-backend-lib/src/meet_actor.rs
// ============================
use std::ops::ControlFlow;
use std::time::Duration;

use metrics::counter;
use reflights_common::{ClientMessage, Decision, Role, Seat, ServerMessage};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::aggregator::{DecisionAggregator, SubmitOutcome};
use crate::dispatcher;
use crate::error::AppError;
use crate::health::RefereeHealth;
use crate::metrics as keys;
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::timers::{PlatformTimerState, TimerEvent, TimerScheduler, TimerSettings};

/// Per-meet behaviour knobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub timers: TimerSettings,
    /// How long a displayed result stays up before it is cleared automatically
    pub results_display: Option<Duration>,
    /// Start a next-attempt timer whenever results are displayed
    pub auto_next_attempt: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timers: TimerSettings::default(),
            results_display: Some(Duration::from_secs(15)),
            auto_next_attempt: true,
        }
    }
}

/// Message sent *into* the actor
#[derive(Debug)]
pub enum ActorMsg {
    Attach {
        conn: ConnectionId,
        tx: mpsc::Sender<ServerMessage>,
        identity: Option<String>,
    },
    Detach {
        conn: ConnectionId,
    },
    Client {
        conn: ConnectionId,
        msg: ClientMessage,
    },
    Reset {
        resp_tx: oneshot::Sender<()>,
    },
    ForceVacate {
        seat: Seat,
        resp_tx: oneshot::Sender<bool>,
    },
    Snapshot {
        resp_tx: oneshot::Sender<SessionSnapshot>,
    },
    /// Stop the actor if it has no connections and has been quiet for `retention`
    ShutdownIfIdle {
        retention: Duration,
        resp_tx: oneshot::Sender<bool>,
    },
    Shutdown {
        resp_tx: oneshot::Sender<()>,
    },
}

/// Read-only view of a meet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub meet_name: String,
    pub connections: usize,
    pub occupied: Vec<Seat>,
    pub decisions_submitted: Vec<Seat>,
    pub result_displayed: bool,
    pub attempt: u64,
    pub platform: PlatformTimerState,
    pub platform_remaining: u32,
    /// `(index, remaining)` per live next-attempt timer
    pub next_attempts: Vec<(u32, u32)>,
    pub idle_for: Duration,
}

/// Handle that other components keep
#[derive(Clone, Debug)]
pub struct MeetHandle {
    pub cmd_tx: mpsc::UnboundedSender<ActorMsg>,
}

impl MeetHandle {
    pub fn attach(
        &self,
        conn: ConnectionId,
        tx: mpsc::Sender<ServerMessage>,
        identity: Option<String>,
    ) -> Result<(), AppError> {
        self.cmd_tx.send(ActorMsg::Attach { conn, tx, identity })?;
        Ok(())
    }

    pub fn detach(&self, conn: ConnectionId) {
        // A stopped actor has already dropped the connection.
        let _ = self.cmd_tx.send(ActorMsg::Detach { conn });
    }

    pub fn send_client(&self, conn: ConnectionId, msg: ClientMessage) -> Result<(), AppError> {
        self.cmd_tx.send(ActorMsg::Client { conn, msg })?;
        Ok(())
    }

    pub async fn reset(&self) -> Result<(), AppError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx.send(ActorMsg::Reset { resp_tx })?;
        Ok(resp_rx.await?)
    }

    pub async fn force_vacate(&self, seat: Seat) -> Result<bool, AppError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx.send(ActorMsg::ForceVacate { seat, resp_tx })?;
        Ok(resp_rx.await?)
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, AppError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx.send(ActorMsg::Snapshot { resp_tx })?;
        Ok(resp_rx.await?)
    }

    pub async fn shutdown_if_idle(&self, retention: Duration) -> Result<bool, AppError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx.send(ActorMsg::ShutdownIfIdle { retention, resp_tx })?;
        Ok(resp_rx.await?)
    }

    pub async fn shutdown(&self) -> Result<(), AppError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx.send(ActorMsg::Shutdown { resp_tx })?;
        Ok(resp_rx.await?)
    }

    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }

    /// Whether both handles talk to the same actor
    pub fn same_session(&self, other: &MeetHandle) -> bool {
        self.cmd_tx.same_channel(&other.cmd_tx)
    }
}

/// Owns every piece of mutable state of one meet.
///
/// Commands and timer wake-ups are handled one at a time on the actor's
/// task, so each mutation and the broadcasts it causes are never
/// interleaved with another.
pub struct MeetActor {
    meet_name: String,
    settings: SessionSettings,
    registry: ConnectionRegistry,
    aggregator: DecisionAggregator,
    timers: TimerScheduler,
    /// Pending automatic `clearResults`: when, and for which attempt
    auto_clear: Option<(Instant, u64)>,
    last_activity: Instant,
}

impl MeetActor {
    pub fn new(meet_name: String, settings: SessionSettings) -> Self {
        MeetActor {
            meet_name,
            timers: TimerScheduler::new(settings.timers),
            settings,
            registry: ConnectionRegistry::new(),
            aggregator: DecisionAggregator::new(),
            auto_clear: None,
            last_activity: Instant::now(),
        }
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ActorMsg>) {
        debug!(meet = %self.meet_name, "meet actor started");
        loop {
            let wake = self.next_wake();
            tokio::select! {
                biased;
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    if self.handle(msg).is_break() {
                        break;
                    }
                }
                () = sleep_until_opt(wake) => self.on_wake(Instant::now()),
            }
        }
        debug!(meet = %self.meet_name, "meet actor stopped");
    }

    fn handle(&mut self, msg: ActorMsg) -> ControlFlow<()> {
        let now = Instant::now();
        match msg {
            ActorMsg::Attach { conn, tx, identity } => {
                self.last_activity = now;
                self.registry.attach(conn, tx, identity);
                debug!(meet = %self.meet_name, conn = %conn, "connection attached");
                self.unicast(conn, RefereeHealth::from_registry(&self.registry).to_message());
                self.unicast(conn, self.registry.occupancy_message());
            },
            ActorMsg::Detach { conn } => {
                self.last_activity = now;
                self.drop_connection(conn);
            },
            ActorMsg::Client { conn, msg } => {
                self.last_activity = now;
                self.handle_client(conn, msg, now);
            },
            ActorMsg::Reset { resp_tx } => {
                self.last_activity = now;
                self.reset();
                let _ = resp_tx.send(());
            },
            ActorMsg::ForceVacate { seat, resp_tx } => {
                self.last_activity = now;
                let vacated = self.registry.vacate(seat);
                if vacated {
                    info!(meet = %self.meet_name, seat = %seat, "seat force-vacated");
                    self.announce_seats();
                }
                let _ = resp_tx.send(vacated);
            },
            ActorMsg::Snapshot { resp_tx } => {
                let _ = resp_tx.send(self.snapshot(now));
            },
            ActorMsg::ShutdownIfIdle { retention, resp_tx } => {
                let idle = self.registry.is_empty()
                    && now.saturating_duration_since(self.last_activity) >= retention;
                let _ = resp_tx.send(idle);
                if idle {
                    info!(meet = %self.meet_name, "idle meet expired");
                    return ControlFlow::Break(());
                }
            },
            ActorMsg::Shutdown { resp_tx } => {
                info!(meet = %self.meet_name, connections = self.registry.len(), "meet destroyed");
                let _ = resp_tx.send(());
                return ControlFlow::Break(());
            },
        }
        ControlFlow::Continue(())
    }

    fn handle_client(&mut self, conn: ConnectionId, msg: ClientMessage, now: Instant) {
        if !self.registry.contains(conn) {
            debug!(meet = %self.meet_name, conn = %conn, "message from detached connection");
            return;
        }
        if let Some(claimed) = msg.meet_name() {
            if claimed != self.meet_name {
                warn!(
                    meet = %self.meet_name,
                    conn = %conn,
                    claimed,
                    "meetName does not match the connection's meet; using the connection's meet"
                );
            }
        }

        match msg {
            ClientMessage::RegisterRef { judge_id, .. } => self.register(conn, judge_id),
            ClientMessage::SubmitDecision {
                judge_id, decision, ..
            } => self.submit_decision(conn, judge_id, decision, now),
            ClientMessage::StartTimer { .. } => self.start_timer(conn, now),
            ClientMessage::StopTimer { .. } => {
                if self.timers.stop_platform_ready() {
                    info!(meet = %self.meet_name, timer = "platform", "timer stopped");
                } else {
                    debug!(meet = %self.meet_name, "stopTimer with no running timer");
                }
            },
            ClientMessage::ResetTimer { .. } => {
                let time_left = self.timers.reset_platform_ready();
                info!(meet = %self.meet_name, timer = "platform", "timer reset");
                self.broadcast(ServerMessage::UpdatePlatformReadyTime { time_left });
            },
            ClientMessage::ResetLights { .. } => {
                info!(meet = %self.meet_name, "lights reset");
                self.begin_attempt();
            },
            ClientMessage::StartNextAttemptTimer { index, .. } => {
                self.start_next_attempt(Some(conn), index, now);
            },
        }
    }

    fn register(&mut self, conn: ConnectionId, role: Role) {
        match self.registry.register(conn, role) {
            Ok(registration) => {
                info!(meet = %self.meet_name, conn = %conn, role = %role, "registered");
                counter!(keys::REFEREE_REGISTERED).increment(1);
                if registration.seats_changed {
                    self.announce_seats();
                } else {
                    self.unicast(conn, RefereeHealth::from_registry(&self.registry).to_message());
                }
            },
            Err(err) => {
                warn!(meet = %self.meet_name, conn = %conn, role = %role, error = %err, "registration rejected");
                self.unicast_error(conn, &err);
            },
        }
    }

    fn submit_decision(
        &mut self,
        conn: ConnectionId,
        judge_id: Role,
        decision: Decision,
        now: Instant,
    ) {
        let seat = match judge_id.seat() {
            Some(seat) if self.registry.seat_of(conn) == Some(seat) => seat,
            _ => {
                let registered = self.registry.role_of(conn).unwrap_or(Role::Observer);
                let err = AppError::UnauthorizedSubmission(format!(
                    "connection is registered as {registered} but submitted as {judge_id}"
                ));
                warn!(meet = %self.meet_name, conn = %conn, error = %err, "submission rejected");
                self.unicast_error(conn, &err);
                return;
            },
        };

        counter!(keys::DECISION_SUBMITTED).increment(1);
        self.broadcast(ServerMessage::JudgeSubmitted { judge_id: seat });

        match self.aggregator.submit(seat, decision) {
            SubmitOutcome::Pending { submitted } => {
                debug!(meet = %self.meet_name, seat = %seat, submitted, "decision recorded");
            },
            SubmitOutcome::Completed(result) => {
                info!(meet = %self.meet_name, verdict = ?result.verdict(), "attempt result");
                counter!(keys::RESULT_DISPLAYED).increment(1);
                self.broadcast(result.to_message());
                self.after_results(now);
            },
            SubmitOutcome::Locked => {
                debug!(meet = %self.meet_name, seat = %seat, "result already displayed, decision ignored");
            },
        }
    }

    fn after_results(&mut self, now: Instant) {
        if self.settings.auto_next_attempt {
            self.start_next_attempt(None, None, now);
        }
        if let Some(window) = self.settings.results_display {
            self.auto_clear = Some((now + window, self.aggregator.attempt()));
        }
    }

    fn start_timer(&mut self, conn: ConnectionId, now: Instant) {
        if self.timers.is_platform_running() {
            info!(meet = %self.meet_name, conn = %conn, "platform timer already running, duplicate start ignored");
            return;
        }
        if let Err(err) = RefereeHealth::from_registry(&self.registry).gate() {
            warn!(meet = %self.meet_name, conn = %conn, error = %err, "timer start refused");
            counter!(keys::HEALTH_ERROR).increment(1);
            self.unicast(
                conn,
                ServerMessage::HealthError {
                    message: err.to_string(),
                },
            );
            return;
        }

        self.begin_attempt();
        let time_left = self.timers.start_platform_ready(now);
        info!(meet = %self.meet_name, timer = "platform", time_left, "timer started");
        counter!(keys::TIMER_STARTED, "timer" => "platform").increment(1);
        self.broadcast(ServerMessage::StartTimer { time_left });
    }

    /// Start a next-attempt timer. Rejections go to `requester` when there is one.
    fn start_next_attempt(&mut self, requester: Option<ConnectionId>, index: Option<u32>, now: Instant) {
        match self.timers.start_next_attempt(index, now) {
            Ok(index) => {
                let time_left = self.timers.settings().next_attempt_secs;
                info!(meet = %self.meet_name, timer = "next_attempt", index, "timer started");
                counter!(keys::TIMER_STARTED, "timer" => "next_attempt").increment(1);
                self.broadcast(ServerMessage::UpdateNextAttemptTime { index, time_left });
            },
            Err(err) => {
                warn!(meet = %self.meet_name, error = %err, "next attempt timer refused");
                if let Some(conn) = requester {
                    self.unicast_error(conn, &err);
                }
            },
        }
    }

    /// Clear decisions for a new attempt and tell every display.
    fn begin_attempt(&mut self) {
        self.aggregator.clear();
        self.auto_clear = None;
        self.broadcast(ServerMessage::ClearResults);
    }

    fn reset(&mut self) {
        self.timers.clear_all();
        self.aggregator.clear();
        self.auto_clear = None;
        self.registry.vacate_all();
        info!(meet = %self.meet_name, connections = self.registry.len(), "meet reset");
        self.broadcast(ServerMessage::ClearResults);
        self.announce_seats();
    }

    fn on_wake(&mut self, now: Instant) {
        for event in self.timers.poll(now) {
            match event {
                TimerEvent::PlatformExpired => {
                    info!(meet = %self.meet_name, timer = "platform", "timer expired");
                },
                TimerEvent::NextAttemptExpired { index } => {
                    info!(meet = %self.meet_name, timer = "next_attempt", index, "timer expired");
                },
                TimerEvent::PlatformTick { .. } | TimerEvent::NextAttemptTick { .. } => {},
            }
            self.broadcast(event.into_message());
        }

        if let Some((at, attempt)) = self.auto_clear {
            if now >= at {
                self.auto_clear = None;
                if attempt == self.aggregator.attempt() {
                    debug!(meet = %self.meet_name, "results display window over");
                    self.aggregator.clear();
                    self.broadcast(ServerMessage::ClearResults);
                }
            }
        }
    }

    fn next_wake(&self) -> Option<Instant> {
        let clear = self.auto_clear.map(|(at, _)| at);
        match (self.timers.next_deadline(), clear) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Broadcast the current referee health and seat occupancy.
    fn announce_seats(&mut self) {
        self.broadcast(RefereeHealth::from_registry(&self.registry).to_message());
        self.broadcast(self.registry.occupancy_message());
    }

    fn broadcast(&mut self, message: ServerMessage) {
        let delivery = dispatcher::broadcast(&self.registry, &message);
        for conn in delivery.failed {
            self.drop_connection(conn);
        }
    }

    fn unicast(&mut self, conn: ConnectionId, message: ServerMessage) {
        if let Err(err) = dispatcher::send_to(&self.registry, conn, &message) {
            debug!(meet = %self.meet_name, conn = %conn, error = %err, "unicast failed");
            self.drop_connection(conn);
        }
    }

    fn unicast_error(&mut self, conn: ConnectionId, err: &AppError) {
        self.unicast(
            conn,
            ServerMessage::Error {
                code: err.error_code().to_string(),
                message: err.to_string(),
            },
        );
    }

    /// Remove a connection; if it held a seat, everyone learns about it.
    fn drop_connection(&mut self, conn: ConnectionId) {
        if !self.registry.contains(conn) {
            return;
        }
        let seat = self.registry.unregister(conn);
        debug!(meet = %self.meet_name, conn = %conn, "connection detached");
        if let Some(seat) = seat {
            info!(meet = %self.meet_name, conn = %conn, seat = %seat, "seat released");
            self.announce_seats();
        }
    }

    fn snapshot(&self, now: Instant) -> SessionSnapshot {
        let (platform, platform_remaining) = self.timers.platform_status();
        SessionSnapshot {
            meet_name: self.meet_name.clone(),
            connections: self.registry.len(),
            occupied: self.registry.connected_seats(),
            decisions_submitted: self.aggregator.submitted(),
            result_displayed: self.aggregator.is_completed(),
            attempt: self.aggregator.attempt(),
            platform,
            platform_remaining,
            next_attempts: self.timers.live_next_attempts(),
            idle_for: now.saturating_duration_since(self.last_activity),
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Spawn a new meet actor and return its handle
pub fn spawn_meet_actor(meet_name: &str, settings: SessionSettings) -> MeetHandle {
    let (cmd_tx, rx_cmd) = mpsc::unbounded_channel();
    let actor = MeetActor::new(meet_name.to_string(), settings);

    tokio::spawn(async move {
        actor.run(rx_cmd).await;
    });

    MeetHandle { cmd_tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflights_common::Verdict;
    use uuid::Uuid;

    struct Client {
        id: ConnectionId,
        rx: mpsc::Receiver<ServerMessage>,
    }

    fn settings() -> SessionSettings {
        SessionSettings {
            timers: TimerSettings::default(),
            results_display: None,
            auto_next_attempt: false,
        }
    }

    fn connect(handle: &MeetHandle) -> Client {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(256);
        handle.attach(id, tx, None).unwrap();
        Client { id, rx }
    }

    fn send(handle: &MeetHandle, client: &Client, msg: ClientMessage) {
        handle.send_client(client.id, msg).unwrap();
    }

    fn register(handle: &MeetHandle, client: &Client, judge_id: Role) {
        send(handle, client, ClientMessage::RegisterRef { judge_id, meet_name: None });
    }

    fn decide(handle: &MeetHandle, client: &Client, seat: Seat, decision: Decision) {
        send(
            handle,
            client,
            ClientMessage::SubmitDecision {
                judge_id: Role::Referee(seat),
                decision,
                meet_name: None,
            },
        );
    }

    /// Everything queued for `client` once the actor has handled all prior commands.
    async fn drain(handle: &MeetHandle, client: &mut Client) -> Vec<ServerMessage> {
        handle.snapshot().await.unwrap();
        let mut out = Vec::new();
        while let Ok(msg) = client.rx.try_recv() {
            out.push(msg);
        }
        out
    }

    /// A meet with three seated referees and one lights display, queues drained.
    async fn full_meet(settings: SessionSettings) -> (MeetHandle, [Client; 3], Client) {
        let handle = spawn_meet_actor("test-meet", settings);
        let mut refs = [connect(&handle), connect(&handle), connect(&handle)];
        for (client, seat) in refs.iter().zip(Seat::ALL) {
            register(&handle, client, Role::Referee(seat));
        }
        let mut lights = connect(&handle);
        register(&handle, &lights, Role::Lights);
        for client in &mut refs {
            drain(&handle, client).await;
        }
        drain(&handle, &mut lights).await;
        (handle, refs, lights)
    }

    #[tokio::test]
    async fn test_attach_receives_health_and_occupancy() {
        let handle = spawn_meet_actor("test-meet", settings());
        let mut client = connect(&handle);

        let msgs = drain(&handle, &mut client).await;
        assert_eq!(
            msgs,
            vec![
                ServerMessage::RefereeHealth {
                    connected_ref_ids: vec![],
                    connected_referees: 0,
                    required_referees: 3,
                },
                ServerMessage::OccupancyChanged {
                    left_user: None,
                    center_user: None,
                    right_user: None,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_decision_scenario() {
        let (handle, mut refs, mut lights) = full_meet(settings()).await;
        let [left, center, right] = &refs;

        decide(&handle, left, Seat::Left, Decision::White);
        drain(&handle, &mut lights).await;

        decide(&handle, center, Seat::Center, Decision::Red);
        assert_eq!(
            drain(&handle, &mut lights).await,
            vec![ServerMessage::JudgeSubmitted { judge_id: Seat::Center }]
        );

        decide(&handle, right, Seat::Right, Decision::White);
        assert_eq!(
            drain(&handle, &mut lights).await,
            vec![
                ServerMessage::JudgeSubmitted { judge_id: Seat::Right },
                ServerMessage::DisplayResults {
                    left_decision: Decision::White,
                    center_decision: Decision::Red,
                    right_decision: Decision::White,
                    verdict: Verdict::Good,
                },
            ]
        );

        // Locked after completion
        decide(&handle, &refs[0], Seat::Left, Decision::Red);
        assert_eq!(
            drain(&handle, &mut refs[1]).await.last(),
            Some(&ServerMessage::JudgeSubmitted { judge_id: Seat::Left })
        );
        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.result_displayed);
        assert_eq!(snapshot.decisions_submitted, Seat::ALL.to_vec());
    }

    #[tokio::test]
    async fn test_submission_from_wrong_seat_is_unicast_error() {
        let (handle, mut refs, mut lights) = full_meet(settings()).await;

        decide(&handle, &refs[0], Seat::Right, Decision::White);
        let msgs = drain(&handle, &mut refs[0]).await;
        assert!(matches!(&msgs[..], [ServerMessage::Error { code, .. }] if code == "DECISION_001"));
        assert!(drain(&handle, &mut lights).await.is_empty());

        send(
            &handle,
            &lights,
            ClientMessage::SubmitDecision {
                judge_id: Role::Lights,
                decision: Decision::Red,
                meet_name: None,
            },
        );
        let msgs = drain(&handle, &mut lights).await;
        assert!(matches!(&msgs[..], [ServerMessage::Error { code, .. }] if code == "DECISION_001"));
        assert!(handle.snapshot().await.unwrap().decisions_submitted.is_empty());
    }

    #[tokio::test]
    async fn test_second_claim_on_seat_is_rejected() {
        let (handle, _refs, _lights) = full_meet(settings()).await;
        let mut intruder = connect(&handle);
        drain(&handle, &mut intruder).await;

        register(&handle, &intruder, Role::Referee(Seat::Center));
        let msgs = drain(&handle, &mut intruder).await;
        assert!(matches!(&msgs[..], [ServerMessage::Error { code, .. }] if code == "SEAT_001"));
        assert_eq!(handle.snapshot().await.unwrap().connections, 5);
    }

    #[tokio::test]
    async fn test_start_timer_without_quorum() {
        let handle = spawn_meet_actor("test-meet", settings());
        let mut left = connect(&handle);
        let mut center = connect(&handle);
        register(&handle, &left, Role::Referee(Seat::Left));
        register(&handle, &center, Role::Referee(Seat::Center));
        drain(&handle, &mut left).await;
        drain(&handle, &mut center).await;

        send(&handle, &center, ClientMessage::StartTimer { meet_name: None });
        assert_eq!(
            drain(&handle, &mut center).await,
            vec![ServerMessage::HealthError {
                message: "Cannot start timer: 2 of 3 referees connected".to_string(),
            }]
        );
        assert!(drain(&handle, &mut left).await.is_empty());
        assert_eq!(
            handle.snapshot().await.unwrap().platform,
            PlatformTimerState::Idle
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_platform_timer_full_countdown() {
        let (handle, refs, mut lights) = full_meet(settings()).await;
        send(&handle, &refs[1], ClientMessage::StartTimer { meet_name: None });

        assert_eq!(lights.rx.recv().await, Some(ServerMessage::ClearResults));
        assert_eq!(lights.rx.recv().await, Some(ServerMessage::StartTimer { time_left: 60 }));
        for expected in (0..60).rev() {
            assert_eq!(
                lights.rx.recv().await,
                Some(ServerMessage::UpdatePlatformReadyTime { time_left: expected })
            );
        }
        assert_eq!(lights.rx.recv().await, Some(ServerMessage::PlatformReadyExpired));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(drain(&handle, &mut lights).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_start_changes_nothing() {
        let (handle, mut refs, mut lights) = full_meet(settings()).await;
        send(&handle, &refs[1], ClientMessage::StartTimer { meet_name: None });
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        decide(&handle, &refs[0], Seat::Left, Decision::White);
        drain(&handle, &mut lights).await;
        drain(&handle, &mut refs[1]).await;

        send(&handle, &refs[1], ClientMessage::StartTimer { meet_name: None });
        assert!(drain(&handle, &mut lights).await.is_empty());
        assert!(drain(&handle, &mut refs[1]).await.is_empty());

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.platform, PlatformTimerState::Running);
        assert_eq!(snapshot.platform_remaining, 50);
        assert_eq!(snapshot.decisions_submitted, vec![Seat::Left]);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            drain(&handle, &mut lights).await,
            vec![ServerMessage::UpdatePlatformReadyTime { time_left: 49 }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_after_stop_begins_new_attempt() {
        let (handle, refs, mut lights) = full_meet(settings()).await;
        send(&handle, &refs[1], ClientMessage::StartTimer { meet_name: None });
        tokio::time::sleep(Duration::from_millis(5_500)).await;
        send(&handle, &refs[1], ClientMessage::StopTimer { meet_name: None });
        drain(&handle, &mut lights).await;

        send(&handle, &refs[1], ClientMessage::StartTimer { meet_name: None });
        assert_eq!(
            drain(&handle, &mut lights).await,
            vec![ServerMessage::ClearResults, ServerMessage::StartTimer { time_left: 60 }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_lights_leaves_timers_running() {
        let (handle, refs, mut lights) = full_meet(settings()).await;
        send(&handle, &refs[1], ClientMessage::StartTimer { meet_name: None });
        send(
            &handle,
            &refs[1],
            ClientMessage::StartNextAttemptTimer { index: None, meet_name: None },
        );
        decide(&handle, &refs[0], Seat::Left, Decision::Red);
        tokio::time::sleep(Duration::from_millis(4_500)).await;
        drain(&handle, &mut lights).await;

        send(&handle, &refs[1], ClientMessage::ResetLights { meet_name: None });
        assert_eq!(drain(&handle, &mut lights).await, vec![ServerMessage::ClearResults]);

        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.decisions_submitted.is_empty());
        assert_eq!((snapshot.platform, snapshot.platform_remaining), (PlatformTimerState::Running, 56));
        assert_eq!(snapshot.next_attempts, vec![(1, 56)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_and_reset_timer() {
        let (handle, refs, mut lights) = full_meet(settings()).await;
        send(&handle, &refs[1], ClientMessage::StartTimer { meet_name: None });
        tokio::time::sleep(Duration::from_millis(3_500)).await;

        send(&handle, &refs[1], ClientMessage::StopTimer { meet_name: None });
        let msgs = drain(&handle, &mut lights).await;
        assert_eq!(
            msgs.last(),
            Some(&ServerMessage::UpdatePlatformReadyTime { time_left: 57 })
        );
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!((snapshot.platform, snapshot.platform_remaining), (PlatformTimerState::Stopped, 57));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(drain(&handle, &mut lights).await.is_empty());

        send(&handle, &refs[1], ClientMessage::ResetTimer { meet_name: None });
        assert_eq!(
            drain(&handle, &mut lights).await,
            vec![ServerMessage::UpdatePlatformReadyTime { time_left: 60 }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_start_next_attempt_and_auto_clear() {
        let (handle, refs, mut lights) = full_meet(SessionSettings {
            timers: TimerSettings {
                next_attempt_secs: 30,
                ..TimerSettings::default()
            },
            results_display: Some(Duration::from_secs(15)),
            auto_next_attempt: true,
        })
        .await;

        for (client, seat) in refs.iter().zip(Seat::ALL) {
            decide(&handle, client, seat, Decision::Red);
        }
        let msgs = drain(&handle, &mut lights).await;
        assert!(msgs.contains(&ServerMessage::UpdateNextAttemptTime { index: 1, time_left: 30 }));
        assert!(matches!(
            msgs.iter().find(|m| matches!(m, ServerMessage::DisplayResults { .. })),
            Some(ServerMessage::DisplayResults { verdict: Verdict::NoLift, .. })
        ));

        tokio::time::sleep(Duration::from_millis(15_500)).await;
        let msgs = drain(&handle, &mut lights).await;
        assert!(msgs.contains(&ServerMessage::ClearResults));
        assert!(msgs.contains(&ServerMessage::UpdateNextAttemptTime { index: 1, time_left: 15 }));
        assert!(!handle.snapshot().await.unwrap().result_displayed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_auto_clear_is_ignored() {
        let (handle, mut refs, mut lights) = full_meet(SessionSettings {
            results_display: Some(Duration::from_secs(15)),
            ..settings()
        })
        .await;

        for (client, seat) in refs.iter().zip(Seat::ALL) {
            decide(&handle, client, seat, Decision::White);
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        send(&handle, &refs[1], ClientMessage::ResetLights { meet_name: None });
        decide(&handle, &refs[0], Seat::Left, Decision::White);
        drain(&handle, &mut lights).await;
        drain(&handle, &mut refs[0]).await;

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(drain(&handle, &mut lights).await.is_empty());
        assert_eq!(
            handle.snapshot().await.unwrap().decisions_submitted,
            vec![Seat::Left]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_attempt_limit_is_unicast() {
        let (handle, mut refs, mut lights) = full_meet(settings()).await;
        for _ in 0..3 {
            send(
                &handle,
                &refs[1],
                ClientMessage::StartNextAttemptTimer { index: None, meet_name: None },
            );
        }
        assert_eq!(drain(&handle, &mut lights).await.len(), 3);

        send(
            &handle,
            &refs[1],
            ClientMessage::StartNextAttemptTimer { index: None, meet_name: None },
        );
        let msgs = drain(&handle, &mut refs[1]).await;
        assert!(matches!(msgs.last(), Some(ServerMessage::Error { code, .. }) if code == "TIMER_001"));
        assert!(drain(&handle, &mut lights).await.is_empty());
        assert_eq!(handle.snapshot().await.unwrap().next_attempts.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_next_attempt_id_is_refused() {
        let (handle, mut refs, mut lights) = full_meet(SessionSettings {
            timers: TimerSettings {
                next_attempt_secs: 2,
                ..TimerSettings::default()
            },
            ..settings()
        })
        .await;
        let start = |index| ClientMessage::StartNextAttemptTimer { index, meet_name: None };

        send(&handle, &refs[1], start(Some(1)));
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(
            drain(&handle, &mut lights).await.last(),
            Some(&ServerMessage::NextAttemptExpired { index: 1 })
        );
        drain(&handle, &mut refs[1]).await;

        send(&handle, &refs[1], start(Some(1)));
        let msgs = drain(&handle, &mut refs[1]).await;
        assert!(matches!(&msgs[..], [ServerMessage::Error { code, .. }] if code == "TIMER_002"));
        assert!(drain(&handle, &mut lights).await.is_empty());

        send(&handle, &refs[1], start(None));
        assert_eq!(
            drain(&handle, &mut lights).await,
            vec![ServerMessage::UpdateNextAttemptTime { index: 2, time_left: 2 }]
        );

        handle.reset().await.unwrap();
        drain(&handle, &mut lights).await;
        send(&handle, &refs[1], start(Some(1)));
        assert_eq!(
            drain(&handle, &mut lights).await,
            vec![ServerMessage::UpdateNextAttemptTime { index: 1, time_left: 2 }]
        );
    }

    #[tokio::test]
    async fn test_disconnect_releases_seat() {
        let (handle, refs, mut lights) = full_meet(settings()).await;
        let [left, center, right] = refs;

        handle.detach(left.id);
        assert_eq!(
            drain(&handle, &mut lights).await,
            vec![
                ServerMessage::RefereeHealth {
                    connected_ref_ids: vec![Seat::Center, Seat::Right],
                    connected_referees: 2,
                    required_referees: 3,
                },
                ServerMessage::OccupancyChanged {
                    left_user: None,
                    center_user: Some(center.id.to_string()),
                    right_user: Some(right.id.to_string()),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_closed_receiver_is_dropped_on_broadcast() {
        let (handle, refs, mut lights) = full_meet(settings()).await;
        let [left, center, _right] = refs;
        drop(left);

        decide(&handle, &center, Seat::Center, Decision::White);
        let msgs = drain(&handle, &mut lights).await;
        assert_eq!(msgs[0], ServerMessage::JudgeSubmitted { judge_id: Seat::Center });
        assert!(msgs.iter().any(|m| matches!(
            m,
            ServerMessage::RefereeHealth { connected_referees: 2, .. }
        )));
        assert_eq!(handle.snapshot().await.unwrap().connections, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_everything_but_connections() {
        let (handle, refs, mut lights) = full_meet(settings()).await;
        send(&handle, &refs[1], ClientMessage::StartTimer { meet_name: None });
        send(
            &handle,
            &refs[1],
            ClientMessage::StartNextAttemptTimer { index: Some(7), meet_name: None },
        );
        decide(&handle, &refs[0], Seat::Left, Decision::White);
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        drain(&handle, &mut lights).await;

        handle.reset().await.unwrap();
        let msgs = drain(&handle, &mut lights).await;
        assert_eq!(
            msgs,
            vec![
                ServerMessage::ClearResults,
                ServerMessage::RefereeHealth {
                    connected_ref_ids: vec![],
                    connected_referees: 0,
                    required_referees: 3,
                },
                ServerMessage::OccupancyChanged {
                    left_user: None,
                    center_user: None,
                    right_user: None,
                },
            ]
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(drain(&handle, &mut lights).await.is_empty());

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.connections, 4);
        assert!(snapshot.occupied.is_empty());
        assert!(snapshot.decisions_submitted.is_empty());
        assert!(snapshot.next_attempts.is_empty());
        assert_eq!(snapshot.platform, PlatformTimerState::Idle);

        register(&handle, &refs[0], Role::Referee(Seat::Left));
        assert_eq!(handle.snapshot().await.unwrap().occupied, vec![Seat::Left]);
    }

    #[tokio::test]
    async fn test_force_vacate_keeps_incumbent_attached() {
        let (handle, refs, _lights) = full_meet(settings()).await;

        assert!(handle.force_vacate(Seat::Right).await.unwrap());
        assert!(!handle.force_vacate(Seat::Right).await.unwrap());
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.occupied, vec![Seat::Left, Seat::Center]);
        assert_eq!(snapshot.connections, 4);

        decide(&handle, &refs[2], Seat::Right, Decision::White);
        assert!(handle.snapshot().await.unwrap().decisions_submitted.is_empty());
    }

    #[tokio::test]
    async fn test_mismatched_meet_name_uses_connection_meet() {
        let (handle, refs, mut lights) = full_meet(settings()).await;
        send(
            &handle,
            &refs[0],
            ClientMessage::SubmitDecision {
                judge_id: Role::Referee(Seat::Left),
                decision: Decision::White,
                meet_name: Some("other-meet".to_string()),
            },
        );
        assert_eq!(
            drain(&handle, &mut lights).await,
            vec![ServerMessage::JudgeSubmitted { judge_id: Seat::Left }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_if_idle() {
        let handle = spawn_meet_actor("test-meet", settings());
        let client = connect(&handle);
        assert!(!handle.shutdown_if_idle(Duration::ZERO).await.unwrap());

        handle.detach(client.id);
        assert!(!handle.shutdown_if_idle(Duration::from_secs(60)).await.unwrap());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(handle.shutdown_if_idle(Duration::from_secs(60)).await.unwrap());
        tokio::task::yield_now().await;
        assert!(handle.snapshot().await.is_err());
    }
}
