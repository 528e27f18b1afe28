use crate::config::ModelSource;
use crate::engine::entity::TensorMap;
use crate::engine::{InferenceEngine, InferenceSession, ModelRole, SessionState};
use crate::error::{Result, SegmentError};
use crate::external::byte_cache::ByteCache;
use crate::external::fetch::ModelFetcher;
use bytes::Bytes;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

/// Share of the overall [0, 100] progress owned by each role.
const PROGRESS_RANGES: [(f32, f32); 2] = [(0.0, 60.0), (60.0, 100.0)];

// Fractions of a role's sub-range reached at each loading step.
const LOOKUP_DONE: f32 = 0.1;
const BYTES_READY: f32 = 0.8;

#[derive(Default)]
struct SessionSlot {
    state: SessionState,
    session: Option<Box<dyn InferenceSession>>,
}

/// Owns the encoder and decoder sessions and their load lifecycle.
pub struct ModelSessionManager {
    engine: Arc<dyn InferenceEngine>,
    fetcher: Arc<dyn ModelFetcher>,
    cache: Arc<dyn ByteCache>,
    sources: [ModelSource; 2],
    slots: [Mutex<SessionSlot>; 2],
}

impl ModelSessionManager {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        fetcher: Arc<dyn ModelFetcher>,
        cache: Arc<dyn ByteCache>,
        encoder: ModelSource,
        decoder: ModelSource,
    ) -> Self {
        Self {
            engine,
            fetcher,
            cache,
            sources: [encoder, decoder],
            slots: Default::default(),
        }
    }

    pub fn state(&self, role: ModelRole) -> SessionState {
        self.slots[role.index()].lock().state
    }

    pub fn is_ready(&self) -> bool {
        ModelRole::ALL
            .iter()
            .all(|role| self.state(*role) == SessionState::Ready)
    }

    /// Loads both sessions in order, reporting monotonic progress in [0, 100].
    ///
    /// Roles that are already ready are skipped; when both are, this only reports 100.
    pub async fn load<F>(&self, on_progress: F) -> Result<()>
    where
        F: Fn(f32) + Send + Sync,
    {
        let progress = ProgressReporter::new(&on_progress);
        if self.is_ready() {
            progress.report(100.0);
            return Ok(());
        }

        for role in ModelRole::ALL {
            let (start, end) = PROGRESS_RANGES[role.index()];
            if self.state(role) == SessionState::Ready {
                progress.report(end);
                continue;
            }
            self.load_role(role, &progress.range(start, end)).await?;
        }

        progress.report(100.0);
        Ok(())
    }

    async fn load_role(&self, role: ModelRole, progress: &ProgressRange<'_>) -> Result<()> {
        let source = &self.sources[role.index()];
        let guard = LoadGuard::begin(&self.slots[role.index()]);
        info!("loading {role} model from {}", source.url);
        progress.report(0.0);

        let bytes = match self.cached_bytes(role, source) {
            Some(bytes) => {
                progress.report(LOOKUP_DONE);
                bytes
            }
            None => {
                progress.report(LOOKUP_DONE);
                let bytes = self
                    .fetcher
                    .fetch(&source.url, &|received, total| {
                        if let Some(total) = total.filter(|total| *total > 0) {
                            let ratio = (received as f32 / total as f32).min(1.0);
                            progress.report(LOOKUP_DONE + (BYTES_READY - LOOKUP_DONE) * ratio);
                        }
                    })
                    .await
                    .map_err(|err| {
                        error!("fetching {role} model failed: {err}");
                        SegmentError::model_load(role, &source.url, err)
                    })?;
                if let Err(err) = self.cache.put(source.key(), &bytes) {
                    warn!("could not cache {role} model under `{}`: {err:#}", source.key());
                }
                bytes
            }
        };
        progress.report(BYTES_READY);

        let session = self.engine.create_session(role, &bytes).map_err(|err| {
            error!("building {role} session failed: {err:#}");
            SegmentError::model_load(role, &source.url, format!("{err:#}"))
        })?;
        guard.complete(session);
        progress.report(1.0);
        info!("{role} session ready");
        Ok(())
    }

    fn cached_bytes(&self, role: ModelRole, source: &ModelSource) -> Option<Bytes> {
        match self.cache.get(source.key()) {
            Ok(Some(bytes)) => {
                debug!("{role} model found in cache ({} bytes)", bytes.len());
                Some(bytes)
            }
            Ok(None) => None,
            Err(err) => {
                warn!("reading {role} model from cache failed, fetching instead: {err:#}");
                None
            }
        }
    }

    pub fn run(&self, role: ModelRole, inputs: TensorMap) -> Result<TensorMap> {
        let mut slot = self.slots[role.index()].lock();
        let state = slot.state;
        let session = match (state, slot.session.as_mut()) {
            (SessionState::Ready, Some(session)) => session,
            _ => return Err(SegmentError::SessionNotReady { role, state }),
        };
        session
            .run(inputs)
            .map_err(|err| SegmentError::inference(role, err))
    }
}

/// Marks a slot `loading` and guarantees it leaves that state, even when the
/// owning future is dropped mid-load.
struct LoadGuard<'a> {
    slot: &'a Mutex<SessionSlot>,
    completed: bool,
}

impl<'a> LoadGuard<'a> {
    fn begin(slot: &'a Mutex<SessionSlot>) -> Self {
        {
            let mut slot = slot.lock();
            slot.state = SessionState::Loading;
            slot.session = None;
        }
        Self {
            slot,
            completed: false,
        }
    }

    fn complete(mut self, session: Box<dyn InferenceSession>) {
        let mut slot = self.slot.lock();
        slot.session = Some(session);
        slot.state = SessionState::Ready;
        self.completed = true;
    }
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            let mut slot = self.slot.lock();
            slot.session = None;
            slot.state = SessionState::Failed;
        }
    }
}

/// Forwards progress to the caller, dropping any value below the last one sent.
struct ProgressReporter<'a> {
    sink: &'a (dyn Fn(f32) + Send + Sync),
    last: Mutex<Option<f32>>,
}

impl<'a> ProgressReporter<'a> {
    fn new(sink: &'a (dyn Fn(f32) + Send + Sync)) -> Self {
        Self {
            sink,
            last: Mutex::new(None),
        }
    }

    fn report(&self, value: f32) {
        let value = value.clamp(0.0, 100.0);
        let mut last = self.last.lock();
        if last.is_some_and(|last| value <= last) {
            return;
        }
        *last = Some(value);
        drop(last);
        (self.sink)(value);
    }

    fn range(&self, start: f32, end: f32) -> ProgressRange<'_> {
        ProgressRange {
            reporter: self,
            start,
            end,
        }
    }
}

struct ProgressRange<'a> {
    reporter: &'a ProgressReporter<'a>,
    start: f32,
    end: f32,
}

impl ProgressRange<'_> {
    fn report(&self, fraction: f32) {
        let fraction = fraction.clamp(0.0, 1.0);
        self.reporter
            .report(self.start + (self.end - self.start) * fraction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reporter_is_monotonic() {
        let seen = Mutex::new(Vec::new());
        let sink = |value: f32| seen.lock().push(value);
        let reporter = ProgressReporter::new(&sink);

        reporter.report(10.0);
        reporter.report(5.0);
        reporter.report(10.0);
        reporter.report(150.0);

        assert_eq!(*seen.lock(), vec![10.0, 100.0]);
    }

    #[test]
    fn range_maps_into_sub_interval() {
        let seen = Mutex::new(Vec::new());
        let sink = |value: f32| seen.lock().push(value);
        let reporter = ProgressReporter::new(&sink);

        let range = reporter.range(60.0, 100.0);
        range.report(0.0);
        range.report(0.5);
        range.report(2.0);

        assert_eq!(*seen.lock(), vec![60.0, 80.0, 100.0]);
    }

    #[test]
    fn dropped_guard_marks_failed() {
        let slot = Mutex::new(SessionSlot::default());
        {
            let _guard = LoadGuard::begin(&slot);
            assert_eq!(slot.lock().state, SessionState::Loading);
        }
        assert_eq!(slot.lock().state, SessionState::Failed);
        assert!(slot.lock().session.is_none());
    }
}
