//! Access control loop.
//!
//! One frame is pulled and fully handled (locate, match, log) before the
//! next. A grant starts the cool-down, after which the loop terminates and
//! hands the authenticated [`Session`] to the caller.
//!
//! ```text
//! Idle ──face──▶ Scanning ──Granted──▶ CoolDown ──▶ Terminated
//!   ▲               │  ▲
//!   └───no face─────┘  └── Denied / MultiFace / Untrained
//! ```

use crate::audit::{AccessAttempt, AuditLog, Outcome};
use crate::capture::{FaceLocator, FrameSource};
use crate::command::{CommandSource, OperatorCommand};
use crate::enroll::{self, EnrollError, EnrollmentReport, EnrollmentRequest};
use crate::matcher::{MatchOutcome, Matcher, PixelDiffMatcher};
use crate::policy::{Profile, ProfileLevel, SecurityPolicy};
use crate::store::TemplateStore;
use crate::template::Template;
use crate::types::{FaceRegion, Frame, Identity};
use chrono::{DateTime, Local};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AccessError {
    #[error("frame source unavailable: {failures} consecutive failures before the first frame")]
    FrameSourceUnavailable { failures: u32 },
    #[error("not allowed while {0:?}")]
    InvalidState(AccessState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessState {
    Idle,
    Scanning,
    Enrolling,
    CoolDown,
    Terminated,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    NoFace,
    /// Number of faces seen.
    MultiFace(usize),
    Untrained,
    Granted { identity: Identity, confidence: f32 },
    Denied { confidence: f32 },
}

impl Verdict {
    pub fn outcome(&self) -> Outcome {
        match self {
            Verdict::NoFace => Outcome::NoFace,
            Verdict::MultiFace(_) => Outcome::MultiFace,
            Verdict::Untrained => Outcome::Untrained,
            Verdict::Granted { .. } => Outcome::Granted,
            Verdict::Denied { .. } => Outcome::Denied,
        }
    }
}

/// What one poll cycle did.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// State after the cycle.
    pub state: AccessState,
    /// `None` when the cycle was skipped (frame read or detection failed).
    pub verdict: Option<Verdict>,
}

/// An authenticated hand-off to the downstream application.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub identity: Identity,
    pub confidence: f32,
    pub profile_name: &'static str,
    pub authenticated_at: DateTime<Local>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub cool_down: Duration,
    /// Command polling period during the cool-down.
    pub poll_interval: Duration,
    pub sample_quota: usize,
    pub max_consecutive_frame_failures: u32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            cool_down: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
            sample_quota: enroll::DEFAULT_SAMPLE_QUOTA,
            max_consecutive_frame_failures: 30,
        }
    }
}

/// All mutable state of the kiosk.
pub struct AuthSystem {
    pub store: TemplateStore,
    pub policy: SecurityPolicy,
    pub audit: AuditLog,
    authenticated: Option<Session>,
}

impl AuthSystem {
    pub fn new(store: TemplateStore, policy: SecurityPolicy, audit: AuditLog) -> Self {
        Self {
            store,
            policy,
            audit,
            authenticated: None,
        }
    }

    pub fn authenticated(&self) -> Option<&Session> {
        self.authenticated.as_ref()
    }

    pub fn end_session(&mut self) {
        if let Some(session) = self.authenticated.take() {
            tracing::info!(external_id = %session.identity.external_id, "session ended");
        }
    }
}

pub struct AccessController<S, L> {
    source: S,
    locator: L,
    matcher: Box<dyn Matcher + Send>,
    system: AuthSystem,
    settings: LoopSettings,
    state: AccessState,
    frame_seen: bool,
    consecutive_failures: u32,
    quit_requested: bool,
}

impl<S: FrameSource, L: FaceLocator> AccessController<S, L> {
    pub fn new(source: S, locator: L, system: AuthSystem, settings: LoopSettings) -> Self {
        Self {
            source,
            locator,
            matcher: Box::new(PixelDiffMatcher),
            system,
            settings,
            state: AccessState::Idle,
            frame_seen: false,
            consecutive_failures: 0,
            quit_requested: false,
        }
    }

    pub fn with_matcher(mut self, matcher: impl Matcher + Send + 'static) -> Self {
        self.matcher = Box::new(matcher);
        self
    }

    pub fn state(&self) -> AccessState {
        self.state
    }

    pub fn system(&self) -> &AuthSystem {
        &self.system
    }

    pub fn system_mut(&mut self) -> &mut AuthSystem {
        &mut self.system
    }

    pub fn into_system(self) -> AuthSystem {
        self.system
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn locator(&self) -> &L {
        &self.locator
    }

    /// Run until a grant has cooled down or the operator quits.
    ///
    /// Pending commands are applied before every cycle. Returns the session
    /// on a grant, `None` on quit.
    pub fn run(&mut self, commands: &mut dyn CommandSource) -> Result<Option<Session>, AccessError> {
        tracing::info!(
            profile = self.system.policy.active().name,
            identities = self.system.store.set().identity_count(),
            "access loop started"
        );
        loop {
            while !self.quit_requested {
                let Some(command) = commands.poll_command() else {
                    break;
                };
                self.handle_command(command, commands);
            }
            if self.quit_requested {
                self.state = AccessState::Terminated;
            }
            if self.state == AccessState::Terminated {
                tracing::info!("access loop terminated by operator");
                return Ok(None);
            }

            let report = self.poll_cycle()?;
            if report.state == AccessState::CoolDown {
                return self.cool_down(commands).map(Some);
            }
        }
    }

    /// Pull one frame and decide a verdict for it.
    pub fn poll_cycle(&mut self) -> Result<CycleReport, AccessError> {
        if !matches!(self.state, AccessState::Idle | AccessState::Scanning) {
            return Err(AccessError::InvalidState(self.state));
        }

        let frame = match self.source.next_frame() {
            Ok(frame) => {
                self.consecutive_failures = 0;
                self.frame_seen = true;
                frame.equalized()
            }
            Err(e) => {
                self.consecutive_failures += 1;
                let max = self.settings.max_consecutive_frame_failures.max(1);
                if !self.frame_seen && self.consecutive_failures >= max {
                    return Err(AccessError::FrameSourceUnavailable {
                        failures: self.consecutive_failures,
                    });
                }
                tracing::warn!(error = %e, failures = self.consecutive_failures, "frame skipped");
                return Ok(self.skipped());
            }
        };

        let profile = self.system.policy.active();
        let regions = match self.locator.locate(&frame, &profile.detection()) {
            Ok(regions) => regions,
            Err(e) => {
                tracing::warn!(error = %e, "detection failed, frame skipped");
                return Ok(self.skipped());
            }
        };

        let verdict = match regions.as_slice() {
            [] => Verdict::NoFace,
            [region] => self.evaluate(&frame, region, profile),
            many => Verdict::MultiFace(many.len()),
        };

        self.state = match &verdict {
            Verdict::NoFace => AccessState::Idle,
            Verdict::Granted { .. } => AccessState::CoolDown,
            _ => AccessState::Scanning,
        };
        Ok(CycleReport {
            state: self.state,
            verdict: Some(verdict),
        })
    }

    fn skipped(&self) -> CycleReport {
        CycleReport {
            state: self.state,
            verdict: None,
        }
    }

    /// Match one face and log the attempt.
    fn evaluate(&mut self, frame: &Frame, region: &FaceRegion, profile: &'static Profile) -> Verdict {
        let Some(probe) = Template::from_region(frame, region) else {
            return Verdict::NoFace;
        };

        let best = match self.matcher.best_match(&probe, self.system.store.set()) {
            MatchOutcome::Untrained => {
                tracing::debug!("face seen but no identity is enrolled");
                return Verdict::Untrained;
            }
            MatchOutcome::Best(best) => best,
        };

        let identity = self.system.store.set().identity(best.identity_index).cloned();
        let verdict = match identity {
            Some(identity) if profile.accepts(best.confidence) => Verdict::Granted {
                identity,
                confidence: best.confidence,
            },
            _ => Verdict::Denied {
                confidence: best.confidence,
            },
        };

        let name = match &verdict {
            Verdict::Granted { identity, .. } => {
                tracing::info!(
                    external_id = %identity.external_id,
                    confidence = best.confidence,
                    profile = profile.name,
                    "access granted"
                );
                self.system.authenticated = Some(Session {
                    identity: identity.clone(),
                    confidence: best.confidence,
                    profile_name: profile.name,
                    authenticated_at: Local::now(),
                });
                Some(identity.display_name.clone())
            }
            _ => {
                tracing::info!(
                    confidence = best.confidence,
                    score = best.score,
                    profile = profile.name,
                    "access denied"
                );
                None
            }
        };

        let attempt = AccessAttempt::now(verdict.outcome(), name, best.confidence, profile.name);
        if let Err(e) = self.system.audit.record(attempt) {
            tracing::error!(error = %e, "failed to append audit entry");
        }
        verdict
    }

    /// Apply one operator command. Commands that do not fit the current
    /// state are ignored.
    pub fn handle_command(&mut self, command: OperatorCommand, commands: &mut dyn CommandSource) {
        match command {
            OperatorCommand::Quit => self.quit_requested = true,
            OperatorCommand::Cancel => {
                tracing::debug!(state = ?self.state, "nothing to cancel");
            }
            OperatorCommand::SwitchProfile(level) => self.switch_profile(level),
            OperatorCommand::Enroll {
                external_id,
                display_name,
            } => {
                if self.quit_requested
                    || !matches!(self.state, AccessState::Idle | AccessState::Scanning)
                {
                    tracing::warn!(state = ?self.state, "enrollment ignored");
                    return;
                }
                let request = EnrollmentRequest::new(&display_name, &external_id)
                    .with_quota(self.settings.sample_quota);
                match self.enroll(&request, commands) {
                    Ok(report) => tracing::info!(
                        name = %report.identity.display_name,
                        samples = report.samples,
                        "enrollment complete"
                    ),
                    Err(e) => tracing::warn!(error = %e, "enrollment failed"),
                }
            }
        }
    }

    fn switch_profile(&mut self, level: ProfileLevel) {
        if self.state == AccessState::Terminated {
            return;
        }
        if self.system.policy.switch(level) {
            tracing::info!(profile = %level, "security profile switched");
        }
    }

    /// Run the enrollment pipeline in place of authentication.
    ///
    /// `cancel` or `quit` from `commands` stop collection; a quit also ends
    /// the loop once enrollment is over. A profile switch applies from the
    /// next frame on. The loop returns to `Scanning`
    /// whatever the result.
    pub fn enroll(
        &mut self,
        request: &EnrollmentRequest,
        commands: &mut dyn CommandSource,
    ) -> Result<EnrollmentReport, EnrollError> {
        if !matches!(self.state, AccessState::Idle | AccessState::Scanning) {
            return Err(EnrollError::Busy);
        }
        request.validate(self.system.store.set())?;

        self.state = AccessState::Enrolling;
        let max_failures = self.settings.max_consecutive_frame_failures;

        let collected = {
            let quit = &mut self.quit_requested;
            let policy = &mut self.system.policy;
            let mut next_params = || {
                while let Some(command) = commands.poll_command() {
                    match command {
                        OperatorCommand::Quit => {
                            *quit = true;
                            return None;
                        }
                        OperatorCommand::Cancel => return None,
                        OperatorCommand::SwitchProfile(level) => {
                            if policy.switch(level) {
                                tracing::info!(profile = %level, "security profile switched");
                            }
                        }
                        OperatorCommand::Enroll { .. } => {
                            tracing::warn!("enrollment already running, command ignored");
                        }
                    }
                }
                Some(policy.active().detection())
            };
            enroll::collect_samples(
                &mut self.source,
                &mut self.locator,
                request.sample_quota,
                max_failures,
                &mut next_params,
            )
        };

        let result = collected.and_then(|c| enroll::commit(&mut self.system.store, request, c));
        self.state = AccessState::Scanning;
        result
    }

    /// Hold the grant for the cool-down, then terminate with the session.
    ///
    /// Commands are checked every `poll_interval`; `cancel` or `quit` end
    /// the wait early.
    pub fn cool_down(&mut self, commands: &mut dyn CommandSource) -> Result<Session, AccessError> {
        let session = match (&self.state, self.system.authenticated()) {
            (AccessState::CoolDown, Some(session)) => session.clone(),
            _ => return Err(AccessError::InvalidState(self.state)),
        };

        let deadline = Instant::now() + self.settings.cool_down;
        'wait: loop {
            while let Some(command) = commands.poll_command() {
                match command {
                    OperatorCommand::Quit | OperatorCommand::Cancel => {
                        tracing::info!("cool-down ended early");
                        break 'wait;
                    }
                    OperatorCommand::SwitchProfile(level) => self.switch_profile(level),
                    OperatorCommand::Enroll { .. } => {
                        tracing::warn!("enrollment ignored during cool-down");
                    }
                }
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(self.settings.poll_interval.min(deadline - now));
        }

        self.state = AccessState::Terminated;
        tracing::info!(external_id = %session.identity.external_id, "handing off session");
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::UNKNOWN_IDENTITY;
    use crate::testing::{
        gradient_frame, probe_of, shifted, ScriptedLocator, ScriptedSource, FACE, OTHER_FACE,
    };
    use std::collections::VecDeque;

    fn fast_settings() -> LoopSettings {
        LoopSettings {
            cool_down: Duration::from_millis(5),
            poll_interval: Duration::from_millis(1),
            sample_quota: 25,
            max_consecutive_frame_failures: 3,
        }
    }

    fn system_in(dir: &tempfile::TempDir) -> AuthSystem {
        AuthSystem::new(
            TemplateStore::empty(dir.path().join("user_data/user_profiles.json")),
            SecurityPolicy::default(),
            AuditLog::new(dir.path().join("security_logs")),
        )
    }

    /// Alice enrolled with 20 templates at distance `delta` from the probe.
    fn system_with_alice(dir: &tempfile::TempDir, delta: u8) -> AuthSystem {
        let mut system = system_in(dir);
        let probe = probe_of(&gradient_frame(0), &FACE);
        system
            .store
            .commit_identity("Alice", "A1", vec![shifted(&probe, delta); 20])
            .unwrap();
        system
    }

    fn controller(
        system: AuthSystem,
        locator: ScriptedLocator,
    ) -> AccessController<ScriptedSource, ScriptedLocator> {
        AccessController::new(
            ScriptedSource::repeating(gradient_frame(0)),
            locator,
            system,
            fast_settings(),
        )
    }

    fn no_commands() -> VecDeque<OperatorCommand> {
        VecDeque::new()
    }

    #[test]
    fn test_alice_granted_at_75_under_medio() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(system_with_alice(&dir, 25), ScriptedLocator::always(&[FACE]));

        let report = c.poll_cycle().unwrap();

        let Some(Verdict::Granted { identity, confidence }) = report.verdict else {
            panic!("expected a grant, got {report:?}");
        };
        assert_eq!(identity.external_id, "A1");
        assert_eq!(confidence, 75.0);
        assert_eq!(report.state, AccessState::CoolDown);

        let log = c.system().audit.history();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].outcome, Outcome::Granted);
        assert_eq!(log[0].identity.as_deref(), Some("Alice"));
        assert_eq!(log[0].confidence, 75.0);
        assert_eq!(log[0].profile, "Medio");
        assert!(log[0].to_line().contains("| GRANTED | Alice | 75.0% | Medio"));
    }

    #[test]
    fn test_confidence_equal_to_threshold_grants() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(system_with_alice(&dir, 30), ScriptedLocator::always(&[FACE]));
        let report = c.poll_cycle().unwrap();
        assert!(matches!(
            report.verdict,
            Some(Verdict::Granted { confidence, .. }) if confidence == 70.0
        ));
    }

    #[test]
    fn test_low_confidence_denied_and_scanning_continues() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(system_with_alice(&dir, 50), ScriptedLocator::always(&[FACE]));

        for _ in 0..3 {
            let report = c.poll_cycle().unwrap();
            assert_eq!(report.verdict, Some(Verdict::Denied { confidence: 50.0 }));
            assert_eq!(report.state, AccessState::Scanning);
        }

        let log = c.system().audit.history();
        assert_eq!(log.len(), 3);
        assert!(log.iter().all(|a| a.outcome == Outcome::Denied && a.identity.is_none()));
        assert!(log[0].to_line().contains(UNKNOWN_IDENTITY));
        assert!(c.system().authenticated().is_none());
    }

    #[test]
    fn test_two_faces_is_multi_face_and_not_logged() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(
            system_with_alice(&dir, 0),
            ScriptedLocator::always(&[FACE, OTHER_FACE]),
        );

        let report = c.poll_cycle().unwrap();

        assert_eq!(report.verdict, Some(Verdict::MultiFace(2)));
        assert_eq!(report.state, AccessState::Scanning);
        assert!(c.system().audit.history().is_empty());
        assert!(!dir.path().join("security_logs").exists());
    }

    #[test]
    fn test_no_face_returns_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(
            system_with_alice(&dir, 0),
            ScriptedLocator::always(&[]).then(&[FACE, OTHER_FACE]),
        );

        assert_eq!(c.poll_cycle().unwrap().state, AccessState::Scanning);
        let report = c.poll_cycle().unwrap();
        assert_eq!(report.verdict, Some(Verdict::NoFace));
        assert_eq!(report.state, AccessState::Idle);
        assert!(c.system().audit.history().is_empty());
    }

    #[test]
    fn test_untrained_store_never_grants() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(system_in(&dir), ScriptedLocator::always(&[FACE]));

        for _ in 0..3 {
            let report = c.poll_cycle().unwrap();
            assert_eq!(report.verdict, Some(Verdict::Untrained));
        }
        assert!(c.system().audit.history().is_empty());
    }

    #[test]
    fn test_profile_switch_applies_on_next_cycle() {
        let dir = tempfile::tempdir().unwrap();
        // Confidence 78: above Medio (70), below Alto (80).
        let mut c = controller(system_with_alice(&dir, 22), ScriptedLocator::always(&[FACE]));
        let mut commands = no_commands();

        c.handle_command(OperatorCommand::SwitchProfile(ProfileLevel::High), &mut commands);
        let denied = c.poll_cycle().unwrap();
        assert_eq!(denied.verdict, Some(Verdict::Denied { confidence: 78.0 }));

        c.handle_command(OperatorCommand::SwitchProfile(ProfileLevel::Medium), &mut commands);
        let granted = c.poll_cycle().unwrap();
        assert!(matches!(granted.verdict, Some(Verdict::Granted { .. })));

        let params: Vec<_> = c.locator().calls.iter().map(|p| p.min_neighbors).collect();
        assert_eq!(params, vec![7, 5]);

        let log = c.system().audit.history();
        assert_eq!(log[0].profile, "Alto");
        assert_eq!(log[0].outcome, Outcome::Denied);
        assert_eq!(log[1].profile, "Medio");
        assert_eq!(log[1].outcome, Outcome::Granted);
    }

    #[test]
    fn test_run_hands_off_session_after_cool_down() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(
            system_with_alice(&dir, 10),
            ScriptedLocator::always(&[FACE]).then(&[]).then(&[FACE, OTHER_FACE]),
        );

        let session = c.run(&mut no_commands()).unwrap().unwrap();

        assert_eq!(session.identity.display_name, "Alice");
        assert_eq!(session.confidence, 90.0);
        assert_eq!(session.profile_name, "Medio");
        assert_eq!(c.state(), AccessState::Terminated);
        assert_eq!(c.source().pulled, 3);

        let system = c.system_mut();
        assert_eq!(system.authenticated(), Some(&session));
        system.end_session();
        assert!(system.authenticated().is_none());
    }

    #[test]
    fn test_grant_is_written_to_todays_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(system_with_alice(&dir, 25), ScriptedLocator::always(&[FACE]));
        c.run(&mut no_commands()).unwrap();

        let system = c.into_system();
        let date = system.audit.history()[0].timestamp.date();
        let on_disk = system.audit.read_day(date).unwrap();
        assert_eq!(on_disk.len(), 1);
        assert_eq!(on_disk[0].outcome, Outcome::Granted);
        assert_eq!(on_disk[0].confidence, 75.0);
    }

    #[test]
    fn test_cancel_ends_cool_down_early() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = AccessController::new(
            ScriptedSource::repeating(gradient_frame(0)),
            ScriptedLocator::always(&[FACE]),
            system_with_alice(&dir, 0),
            LoopSettings {
                cool_down: Duration::from_secs(60),
                ..fast_settings()
            },
        );
        assert_eq!(c.poll_cycle().unwrap().state, AccessState::CoolDown);

        let started = Instant::now();
        let mut commands: VecDeque<_> = [OperatorCommand::Cancel].into_iter().collect();
        let session = c.cool_down(&mut commands).unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(session.confidence, 100.0);
        assert_eq!(c.state(), AccessState::Terminated);
    }

    #[test]
    fn test_no_polling_during_cool_down() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(system_with_alice(&dir, 0), ScriptedLocator::always(&[FACE]));
        c.poll_cycle().unwrap();
        assert!(matches!(
            c.poll_cycle(),
            Err(AccessError::InvalidState(AccessState::CoolDown))
        ));
    }

    #[test]
    fn test_quit_terminates_without_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(system_with_alice(&dir, 0), ScriptedLocator::always(&[FACE]));
        let mut commands: VecDeque<_> = [OperatorCommand::Quit].into_iter().collect();

        assert_eq!(c.run(&mut commands).unwrap(), None);
        assert_eq!(c.state(), AccessState::Terminated);
        assert_eq!(c.source().pulled, 0);
    }

    #[test]
    fn test_dead_camera_is_fatal_before_first_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = AccessController::new(
            ScriptedSource::dead(),
            ScriptedLocator::always(&[FACE]),
            system_in(&dir),
            fast_settings(),
        );
        let err = c.run(&mut no_commands()).unwrap_err();
        assert!(matches!(err, AccessError::FrameSourceUnavailable { failures: 3 }));
    }

    #[test]
    fn test_failures_after_first_frame_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::dead()
            .then_frame(gradient_frame(0))
            .then_failure()
            .then_failure()
            .then_failure()
            .then_failure();
        let mut c = AccessController::new(
            source,
            ScriptedLocator::always(&[]),
            system_in(&dir),
            fast_settings(),
        );

        assert_eq!(c.poll_cycle().unwrap().verdict, Some(Verdict::NoFace));
        for _ in 0..4 {
            assert_eq!(c.poll_cycle().unwrap().verdict, None);
        }
    }

    #[test]
    fn test_enroll_command_trains_store_then_grants() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(system_in(&dir), ScriptedLocator::always(&[FACE]));
        let mut commands: VecDeque<_> = [OperatorCommand::Enroll {
            external_id: "A1".into(),
            display_name: "Alice".into(),
        }]
        .into_iter()
        .collect();

        let session = c.run(&mut commands).unwrap().unwrap();

        assert_eq!(session.identity.external_id, "A1");
        assert_eq!(session.confidence, 100.0);
        assert_eq!(c.system().store.set().template_count(), 25);
        assert_eq!(c.source().pulled, 26);
    }

    #[test]
    fn test_quit_during_enrollment_is_honored_afterwards() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(system_in(&dir), ScriptedLocator::always(&[FACE]));
        let mut commands: VecDeque<_> = [
            OperatorCommand::Enroll {
                external_id: "A1".into(),
                display_name: "Alice".into(),
            },
            OperatorCommand::Quit,
        ]
        .into_iter()
        .collect();

        assert_eq!(c.run(&mut commands).unwrap(), None);
        assert!(!c.system().store.set().is_trained());
        assert_eq!(c.source().pulled, 0);
    }

    #[test]
    fn test_duplicate_enrollment_leaves_loop_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(system_with_alice(&dir, 0), ScriptedLocator::always(&[FACE]));
        let request = EnrollmentRequest::new("Alice again", "A1");

        let err = c.enroll(&request, &mut no_commands()).unwrap_err();

        assert!(matches!(err, EnrollError::DuplicateExternalId(_)));
        assert_eq!(c.state(), AccessState::Idle);
        assert_eq!(c.source().pulled, 0);
    }

    #[test]
    fn test_enroll_queued_behind_quit_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(system_in(&dir), ScriptedLocator::always(&[FACE]));
        let mut commands: VecDeque<_> = [
            OperatorCommand::Quit,
            OperatorCommand::Enroll {
                external_id: "A1".into(),
                display_name: "Alice".into(),
            },
        ]
        .into_iter()
        .collect();

        assert_eq!(c.run(&mut commands).unwrap(), None);
        assert_eq!(c.state(), AccessState::Terminated);
        assert_eq!(c.source().pulled, 0);
        assert_eq!(c.system().store.set().identity_count(), 0);
        assert!(!c.system().store.path().exists());
    }

    /// Yields `command` on the `at`-th poll, nothing otherwise.
    struct DelayedCommand {
        polls: usize,
        at: usize,
        command: Option<OperatorCommand>,
    }

    impl CommandSource for DelayedCommand {
        fn poll_command(&mut self) -> Option<OperatorCommand> {
            self.polls += 1;
            if self.polls == self.at {
                self.command.take()
            } else {
                None
            }
        }
    }

    #[test]
    fn test_profile_switch_during_enrollment_reaches_locator() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(system_in(&dir), ScriptedLocator::always(&[FACE]));
        let mut commands = DelayedCommand {
            polls: 0,
            at: 3,
            command: Some(OperatorCommand::SwitchProfile(ProfileLevel::High)),
        };

        let report = c
            .enroll(&EnrollmentRequest::new("Alice", "A1"), &mut commands)
            .unwrap();

        assert_eq!(report.samples, 25);
        assert_eq!(c.system().policy.level(), ProfileLevel::High);
        let neighbors: Vec<_> = c.locator().calls.iter().map(|p| p.min_neighbors).collect();
        assert_eq!(&neighbors[..2], &[5, 5]);
        assert_eq!(neighbors.len(), 25);
        assert!(neighbors[2..].iter().all(|&n| n == 7));
    }
}
