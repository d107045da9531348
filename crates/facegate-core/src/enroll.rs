//! Enrollment pipeline: collect face samples for a new identity and commit
//! them to the template store in one step.

use crate::capture::{FaceLocator, FrameSource};
use crate::policy::DetectionParams;
use crate::store::{StoreError, TemplateSet, TemplateStore};
use crate::template::Template;
use crate::types::Identity;
use thiserror::Error;

/// Samples requested per enrollment unless configured otherwise.
pub const DEFAULT_SAMPLE_QUOTA: usize = 25;
/// Fewest samples that may be committed, whatever the quota.
pub const MIN_ACCEPTED_SAMPLES: usize = 15;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("display name must not be empty")]
    EmptyDisplayName,
    #[error("external id must not be empty")]
    EmptyExternalId,
    #[error("external id '{0}' is already enrolled")]
    DuplicateExternalId(String),
    #[error("enrollment is only accepted while scanning")]
    Busy,
    #[error("sample quota must be at least 1")]
    InvalidQuota,
    #[error("only {collected} samples collected, {required} required")]
    InsufficientSamples { collected: usize, required: usize },
    #[error("frame source lost after {failures} consecutive failures")]
    FrameSourceLost { failures: u32 },
    #[error("template store: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentRequest {
    pub display_name: String,
    pub external_id: String,
    pub sample_quota: usize,
}

impl EnrollmentRequest {
    pub fn new(display_name: &str, external_id: &str) -> Self {
        Self {
            display_name: display_name.trim().to_string(),
            external_id: external_id.trim().to_string(),
            sample_quota: DEFAULT_SAMPLE_QUOTA,
        }
    }

    pub fn with_quota(mut self, sample_quota: usize) -> Self {
        self.sample_quota = sample_quota;
        self
    }

    /// Checks that must pass before the first frame is pulled.
    pub fn validate(&self, existing: &TemplateSet) -> Result<(), EnrollError> {
        if self.display_name.is_empty() {
            return Err(EnrollError::EmptyDisplayName);
        }
        if self.external_id.is_empty() {
            return Err(EnrollError::EmptyExternalId);
        }
        if self.sample_quota == 0 {
            return Err(EnrollError::InvalidQuota);
        }
        if existing.contains_external_id(&self.external_id) {
            return Err(EnrollError::DuplicateExternalId(self.external_id.clone()));
        }
        Ok(())
    }
}

/// Samples gathered by one collection run.
#[derive(Debug, Default)]
pub struct SampleCollection {
    pub samples: Vec<Template>,
    pub frames: u32,
    /// The operator stopped collection before the quota was reached.
    pub stopped: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentReport {
    pub identity: Identity,
    pub samples: usize,
    pub stopped: bool,
}

/// Pull frames until `quota` samples are collected or the operator stops.
///
/// `next_params` is polled once before each frame and returns the detection
/// parameters for that frame, or `None` to stop. Every region the locator
/// returns becomes a sample; several faces in one frame each count toward
/// the quota. Read failures are skipped until `max_failures` happen in a
/// row.
pub fn collect_samples<S, L>(
    source: &mut S,
    locator: &mut L,
    quota: usize,
    max_failures: u32,
    next_params: &mut dyn FnMut() -> Option<DetectionParams>,
) -> Result<SampleCollection, EnrollError>
where
    S: FrameSource + ?Sized,
    L: FaceLocator + ?Sized,
{
    let mut collection = SampleCollection::default();
    let mut failures = 0u32;

    while collection.samples.len() < quota {
        let Some(params) = next_params() else {
            collection.stopped = true;
            tracing::info!(collected = collection.samples.len(), quota, "enrollment stopped by operator");
            break;
        };

        let frame = match source.next_frame() {
            Ok(frame) => {
                failures = 0;
                frame.equalized()
            }
            Err(e) => {
                failures += 1;
                if failures >= max_failures.max(1) {
                    return Err(EnrollError::FrameSourceLost { failures });
                }
                tracing::debug!(error = %e, failures, "enroll: frame skipped");
                continue;
            }
        };
        collection.frames += 1;

        let regions = match locator.locate(&frame, &params) {
            Ok(regions) => regions,
            Err(e) => {
                tracing::warn!(error = %e, "enroll: detection failed, frame skipped");
                continue;
            }
        };

        let before = collection.samples.len();
        for region in &regions {
            if collection.samples.len() == quota {
                break;
            }
            if let Some(sample) = Template::from_region(&frame, region) {
                collection.samples.push(sample);
            }
        }
        if collection.samples.len() > before {
            tracing::info!(
                collected = collection.samples.len(),
                quota,
                faces = regions.len(),
                "enroll: samples captured"
            );
        }
    }

    Ok(collection)
}

/// Apply the commit rule: at least [`MIN_ACCEPTED_SAMPLES`] samples create
/// the identity and persist the store; fewer leave the store untouched.
pub fn commit(
    store: &mut TemplateStore,
    request: &EnrollmentRequest,
    collection: SampleCollection,
) -> Result<EnrollmentReport, EnrollError> {
    let collected = collection.samples.len();
    if collected < MIN_ACCEPTED_SAMPLES {
        return Err(EnrollError::InsufficientSamples {
            collected,
            required: MIN_ACCEPTED_SAMPLES,
        });
    }

    let identity =
        store.commit_identity(&request.display_name, &request.external_id, collection.samples)?;
    tracing::info!(
        index = identity.index,
        external_id = %identity.external_id,
        samples = collected,
        "identity enrolled"
    );

    Ok(EnrollmentReport {
        identity,
        samples: collected,
        stopped: collection.stopped,
    })
}

/// Validate, collect and commit in one call, with fixed detection
/// parameters.
pub fn enroll<S, L>(
    store: &mut TemplateStore,
    request: &EnrollmentRequest,
    source: &mut S,
    locator: &mut L,
    params: &DetectionParams,
    max_failures: u32,
    should_stop: &mut dyn FnMut() -> bool,
) -> Result<EnrollmentReport, EnrollError>
where
    S: FrameSource + ?Sized,
    L: FaceLocator + ?Sized,
{
    request.validate(store.set())?;
    tracing::info!(
        external_id = %request.external_id,
        quota = request.sample_quota,
        "enrollment started"
    );
    let mut next_params = || (!should_stop()).then_some(*params);
    let collection = collect_samples(
        source,
        locator,
        request.sample_quota,
        max_failures,
        &mut next_params,
    )?;
    commit(store, request, collection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ProfileLevel;
    use crate::testing::{gradient_frame, ScriptedLocator, ScriptedSource, FACE, OTHER_FACE};

    fn params() -> DetectionParams {
        ProfileLevel::Medium.profile().detection()
    }

    fn never() -> impl FnMut() -> bool {
        || false
    }

    fn fixed(params: DetectionParams) -> impl FnMut() -> Option<DetectionParams> {
        move || Some(params)
    }

    fn store_in(dir: &tempfile::TempDir) -> TemplateStore {
        TemplateStore::empty(dir.path().join("user_profiles.json"))
    }

    #[test]
    fn test_enroll_commits_full_quota() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        let mut source = ScriptedSource::repeating(gradient_frame(0));
        let mut locator = ScriptedLocator::always(&[FACE]);

        let request = EnrollmentRequest::new("  Alice ", " A1 ");
        let report = enroll(
            &mut store,
            &request,
            &mut source,
            &mut locator,
            &params(),
            30,
            &mut never(),
        )
        .unwrap();

        assert_eq!(report.identity.display_name, "Alice");
        assert_eq!(report.identity.external_id, "A1");
        assert_eq!(report.samples, DEFAULT_SAMPLE_QUOTA);
        assert!(!report.stopped);
        assert_eq!(source.pulled, DEFAULT_SAMPLE_QUOTA);
        assert_eq!(store.set().template_count(), DEFAULT_SAMPLE_QUOTA);
        assert!(store.set().is_trained());

        let on_disk = TemplateStore::load(store.path()).unwrap();
        assert_eq!(&on_disk, store.set());
    }

    #[test]
    fn test_duplicate_external_id_rejected_before_any_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store
            .commit_identity("Alice", "A1", vec![Template::uniform(1); 15])
            .unwrap();
        let before = store.set().clone();

        let mut source = ScriptedSource::repeating(gradient_frame(0));
        let mut locator = ScriptedLocator::always(&[FACE]);
        let err = enroll(
            &mut store,
            &EnrollmentRequest::new("Impostor", "A1"),
            &mut source,
            &mut locator,
            &params(),
            30,
            &mut never(),
        )
        .unwrap_err();

        assert!(matches!(err, EnrollError::DuplicateExternalId(id) if id == "A1"));
        assert_eq!(source.pulled, 0);
        assert_eq!(store.set(), &before);
    }

    #[test]
    fn test_empty_names_rejected() {
        let set = TemplateSet::new();
        assert!(matches!(
            EnrollmentRequest::new("   ", "A1").validate(&set),
            Err(EnrollError::EmptyDisplayName)
        ));
        assert!(matches!(
            EnrollmentRequest::new("Alice", "").validate(&set),
            Err(EnrollError::EmptyExternalId)
        ));
        assert!(matches!(
            EnrollmentRequest::new("Alice", "A1").with_quota(0).validate(&set),
            Err(EnrollError::InvalidQuota)
        ));
    }

    #[test]
    fn test_stopped_below_floor_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store
            .commit_identity("Bob", "B1", vec![Template::uniform(9); 20])
            .unwrap();
        let before = store.set().clone();

        let mut source = ScriptedSource::repeating(gradient_frame(0));
        let mut locator = ScriptedLocator::always(&[FACE]);
        let mut polls = 0;
        let mut stop_after_ten = || {
            polls += 1;
            polls > 10
        };

        let err = enroll(
            &mut store,
            &EnrollmentRequest::new("Alice", "A1"),
            &mut source,
            &mut locator,
            &params(),
            30,
            &mut stop_after_ten,
        )
        .unwrap_err();

        assert!(matches!(
            err,
            EnrollError::InsufficientSamples { collected: 10, required: 15 }
        ));
        assert_eq!(store.set(), &before);
        assert_eq!(&TemplateStore::load(store.path()).unwrap(), &before);
    }

    #[test]
    fn test_stopped_at_floor_commits_what_was_collected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        let mut source = ScriptedSource::repeating(gradient_frame(0));
        let mut locator = ScriptedLocator::always(&[FACE]);
        let mut polls = 0;
        let mut stop_after_fifteen = || {
            polls += 1;
            polls > 15
        };

        let report = enroll(
            &mut store,
            &EnrollmentRequest::new("Alice", "A1"),
            &mut source,
            &mut locator,
            &params(),
            30,
            &mut stop_after_fifteen,
        )
        .unwrap();

        assert!(report.stopped);
        assert_eq!(report.samples, 15);
        let enrolled = store.set().enrolled(report.identity.index).unwrap();
        assert_eq!(enrolled.templates.len(), 15);
    }

    #[test]
    fn test_frames_without_faces_do_not_count() {
        let mut source = ScriptedSource::repeating(gradient_frame(0));
        let mut locator = ScriptedLocator::always(&[FACE]).then(&[]).then(&[]);

        let collection =
            collect_samples(&mut source, &mut locator, 5, 30, &mut fixed(params())).unwrap();

        assert_eq!(collection.samples.len(), 5);
        assert_eq!(collection.frames, 7);
    }

    #[test]
    fn test_multiple_faces_per_frame_each_count_toward_quota() {
        // No single-subject guard: two faces in one frame give two samples,
        // possibly of two different people.
        let mut source = ScriptedSource::repeating(gradient_frame(0));
        let mut locator = ScriptedLocator::always(&[FACE, OTHER_FACE]);

        let collection =
            collect_samples(&mut source, &mut locator, 25, 30, &mut fixed(params())).unwrap();

        assert_eq!(collection.frames, 13);
        assert_eq!(collection.samples.len(), 25);
    }

    #[test]
    fn test_transient_failures_are_skipped() {
        let mut source = ScriptedSource::repeating(gradient_frame(0))
            .then_failure()
            .then_failure()
            .then_frame(gradient_frame(1));
        let mut locator = ScriptedLocator::always(&[FACE]);

        let collection =
            collect_samples(&mut source, &mut locator, 3, 5, &mut fixed(params())).unwrap();

        assert_eq!(collection.samples.len(), 3);
        assert_eq!(source.pulled, 5);
    }

    #[test]
    fn test_dead_source_aborts_and_discards() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        let mut source = ScriptedSource::dead();
        let mut locator = ScriptedLocator::always(&[FACE]);

        let err = enroll(
            &mut store,
            &EnrollmentRequest::new("Alice", "A1"),
            &mut source,
            &mut locator,
            &params(),
            4,
            &mut never(),
        )
        .unwrap_err();

        assert!(matches!(err, EnrollError::FrameSourceLost { failures: 4 }));
        assert!(!store.set().is_trained());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_locator_sees_active_profile_parameters() {
        let mut source = ScriptedSource::repeating(gradient_frame(0));
        let mut locator = ScriptedLocator::always(&[FACE]);
        let high = ProfileLevel::High.profile().detection();

        collect_samples(&mut source, &mut locator, 2, 30, &mut fixed(high)).unwrap();

        assert_eq!(locator.calls, vec![high, high]);
    }

    #[test]
    fn test_parameters_are_read_before_every_frame() {
        let mut source = ScriptedSource::repeating(gradient_frame(0));
        let mut locator = ScriptedLocator::always(&[FACE]);
        let medium = ProfileLevel::Medium.profile().detection();
        let high = ProfileLevel::High.profile().detection();
        let mut polls = 0;
        let mut next_params = || {
            polls += 1;
            Some(if polls <= 2 { medium } else { high })
        };

        collect_samples(&mut source, &mut locator, 4, 30, &mut next_params).unwrap();

        assert_eq!(locator.calls, vec![medium, medium, high, high]);
    }
}
