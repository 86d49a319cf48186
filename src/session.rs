//! Viewer session for one poll
//!
//! A [`PollSession`] owns the subscriptions of one viewer's poll screen:
//! 1. Poll document and option collection are subscribed on open
//! 2. The viewer's own vote document is read once to learn `has_voted`
//! 3. The ballot collection is subscribed only while results are visible
//! 4. Every delivery folds into the projection and republishes a [`PollView`]
//!
//! Writes (ballot upsert, guest option, lock toggle) go through the injected
//! [`DocumentStore`].

use crate::clock::Clock;
use crate::config::PollConfig;
use crate::document::{self, FIELD_IS_LOCKED};
use crate::projection::{PollProjection, PollView};
use crate::store::{
    Document, DocumentPath, DocumentStore, Snapshot, SnapshotCallback, Subscription, WriteMode,
};
use crate::types::{OptionId, PartyId, PollId, PollOption, VoterId};
use crate::{Error, Result, voting_error};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::sync::watch;
use uuid::Uuid;

type ChannelHandler = fn(&Arc<SessionInner>, Snapshot);

struct SessionInner {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    config: PollConfig,
    party_id: PartyId,
    poll_id: PollId,
    viewer_id: VoterId,
    state: RwLock<PollProjection>,
    channels: Mutex<Vec<Subscription>>,
    ballots: Mutex<Option<Subscription>>,
    // Bumped on every attach/detach; stale deliveries carry an old value
    ballots_generation: AtomicU64,
    closed: AtomicBool,
    view_tx: watch::Sender<PollView>,
}

impl SessionInner {
    fn poll_path(&self) -> DocumentPath {
        DocumentPath::poll(&self.party_id, &self.poll_id)
    }

    fn options_path(&self) -> DocumentPath {
        DocumentPath::options(&self.party_id, &self.poll_id)
    }

    fn votes_path(&self) -> DocumentPath {
        DocumentPath::votes(&self.party_id, &self.poll_id)
    }

    fn own_vote_path(&self) -> DocumentPath {
        DocumentPath::vote(&self.party_id, &self.poll_id, &self.viewer_id)
    }

    fn callback(self: &Arc<Self>, handler: ChannelHandler) -> SnapshotCallback {
        let weak: Weak<Self> = Arc::downgrade(self);
        Arc::new(move |snapshot| {
            if let Some(inner) = weak.upgrade() {
                if !inner.closed.load(Ordering::SeqCst) {
                    handler(&inner, snapshot);
                }
            }
        })
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, PollProjection>> {
        self.state
            .write()
            .map_err(|_| Error::internal("Poll state write error"))
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, PollProjection>> {
        self.state
            .read()
            .map_err(|_| Error::internal("Poll state read error"))
    }

    fn on_poll(self: &Arc<Self>, snapshot: Snapshot) {
        let now = self.clock.now();
        let Some(fields) = snapshot.into_document() else {
            tracing::debug!("Poll {} has no document yet", self.poll_id);
            return;
        };
        let poll = document::decode_poll(&self.poll_id, &fields, now);

        match self.write_state() {
            Ok(mut state) => state.apply_poll(poll),
            Err(e) => {
                tracing::warn!("Dropping poll snapshot: {}", e);
                return;
            }
        }
        self.refresh();
    }

    fn on_options(self: &Arc<Self>, snapshot: Snapshot) {
        let now = self.clock.now();
        let options = document::decode_options(&snapshot.into_documents(), now);
        tracing::debug!("Poll {} options snapshot: {} option(s)", self.poll_id, options.len());

        match self.write_state() {
            Ok(mut state) => state.apply_options(options),
            Err(e) => {
                tracing::warn!("Dropping options snapshot: {}", e);
                return;
            }
        }
        self.refresh();
    }

    fn on_ballots(self: &Arc<Self>, generation: u64, snapshot: Snapshot) {
        if generation != self.ballots_generation.load(Ordering::SeqCst) {
            tracing::debug!("Ignoring ballots from a detached channel");
            return;
        }
        let now = self.clock.now();
        let ballots = document::decode_ballots(&snapshot.into_documents(), now);
        tracing::debug!("Poll {} ballots snapshot: {} ballot(s)", self.poll_id, ballots.len());

        match self.write_state() {
            Ok(mut state) => state.apply_ballots(ballots, now),
            Err(e) => {
                tracing::warn!("Dropping ballots snapshot: {}", e);
                return;
            }
        }
        // May run under the channel lock held by sync_gate, so no gate sync here
        self.publish();
    }

    /// Attach or detach the ballot channel to match visibility, then publish
    fn refresh(self: &Arc<Self>) {
        if let Err(e) = self.sync_gate() {
            tracing::warn!("Could not update ballots channel for poll {}: {}", self.poll_id, e);
        }
        self.publish();
    }

    fn sync_gate(self: &Arc<Self>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let now = self.clock.now();
        let visible = self.write_state()?.visibility(now).is_visible();

        let mut ballots = self
            .ballots
            .lock()
            .map_err(|_| Error::internal("Ballots channel lock error"))?;

        match (visible, ballots.is_some()) {
            (true, false) => {
                let generation = self.ballots_generation.fetch_add(1, Ordering::SeqCst) + 1;
                let weak = Arc::downgrade(self);
                let callback: SnapshotCallback = Arc::new(move |snapshot| {
                    if let Some(inner) = weak.upgrade() {
                        if !inner.closed.load(Ordering::SeqCst) {
                            inner.on_ballots(generation, snapshot);
                        }
                    }
                });
                tracing::info!("Results visible for poll {}, reading ballots", self.poll_id);
                *ballots = Some(self.store.subscribe(&self.votes_path(), callback)?);
            }
            (false, true) => {
                self.ballots_generation.fetch_add(1, Ordering::SeqCst);
                if let Some(subscription) = ballots.take() {
                    subscription.cancel();
                }
                self.write_state()?.clear_ballots();
                tracing::info!("Results hidden for poll {}, ballots detached", self.poll_id);
            }
            _ => {}
        }
        Ok(())
    }

    fn publish(&self) {
        let now = self.clock.now();
        match self.write_state() {
            Ok(mut state) => {
                let view = state.view(now);
                self.view_tx.send_replace(view);
            }
            Err(e) => tracing::warn!("Could not publish poll view: {}", e),
        }
    }

    fn detach_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.ballots_generation.fetch_add(1, Ordering::SeqCst);

        let channels: Vec<Subscription> = match self.channels.lock() {
            Ok(mut channels) => channels.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        let ballots = self.ballots.lock().ok().and_then(|mut b| b.take());

        for subscription in channels.into_iter().chain(ballots) {
            subscription.cancel();
        }
    }
}

/// One viewer's live connection to a poll
pub struct PollSession {
    inner: Arc<SessionInner>,
}

impl PollSession {
    /// Subscribe to the poll and learn whether the viewer already voted
    pub async fn open(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        config: PollConfig,
        party_id: impl Into<PartyId>,
        poll_id: impl Into<PollId>,
        viewer_id: impl Into<VoterId>,
    ) -> Result<Self> {
        let (view_tx, _) = watch::channel(PollView::loading());
        let inner = Arc::new(SessionInner {
            store,
            clock,
            state: RwLock::new(PollProjection::new(config.ranked_min_entries)),
            config,
            party_id: party_id.into(),
            poll_id: poll_id.into(),
            viewer_id: viewer_id.into(),
            channels: Mutex::new(Vec::new()),
            ballots: Mutex::new(None),
            ballots_generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            view_tx,
        });

        let poll_channel = inner
            .store
            .subscribe(&inner.poll_path(), inner.callback(SessionInner::on_poll))?;
        let options_channel = inner
            .store
            .subscribe(&inner.options_path(), inner.callback(SessionInner::on_options))?;
        inner
            .channels
            .lock()
            .map_err(|_| Error::internal("Channel list lock error"))?
            .extend([poll_channel, options_channel]);

        // Single-document read, allowed before results are visible
        let own_vote = inner.store.read_once(&inner.own_vote_path()).await?;
        inner.write_state()?.set_has_voted(own_vote.is_some());

        tracing::info!(
            "Opened poll {} for viewer {} (has_voted={})",
            inner.poll_id,
            inner.viewer_id,
            own_vote.is_some()
        );

        inner.sync_gate()?;
        inner.publish();
        Ok(Self { inner })
    }

    pub fn party_id(&self) -> &str {
        &self.inner.party_id
    }

    pub fn poll_id(&self) -> &str {
        &self.inner.poll_id
    }

    pub fn viewer_id(&self) -> &str {
        &self.inner.viewer_id
    }

    /// Fresh view evaluated at the clock's current time
    ///
    /// Attaches the ballot channel first if results became visible since the
    /// last snapshot, so a visible view always carries a tally.
    pub fn view(&self) -> Result<PollView> {
        self.inner.sync_gate()?;
        let now = self.inner.clock.now();
        Ok(self.inner.write_state()?.view(now))
    }

    /// Receiver of every republished view
    pub fn watch(&self) -> watch::Receiver<PollView> {
        self.inner.view_tx.subscribe()
    }

    /// Whether the ballot collection is currently subscribed
    pub fn is_reading_ballots(&self) -> bool {
        self.inner
            .ballots
            .lock()
            .map(|b| b.is_some())
            .unwrap_or(false)
    }

    /// Re-check visibility at the current time and republish
    ///
    /// Call when time may have moved past the deadline without any new
    /// snapshot arriving.
    pub fn reevaluate(&self) -> Result<PollView> {
        self.inner.refresh();
        self.view()
    }

    /// Click on an option
    pub fn select(&self, option_id: &str) -> Result<()> {
        self.inner.write_state()?.editor_mut().select(option_id);
        self.inner.refresh();
        Ok(())
    }

    /// Reorder the pending ranking
    pub fn move_ranked(&self, sources: &[usize], destination: usize) -> Result<()> {
        self.inner
            .write_state()?
            .editor_mut()
            .move_ranked(sources, destination);
        self.inner.refresh();
        Ok(())
    }

    /// Upsert the viewer's ballot, replacing any previous one
    ///
    /// `has_voted` is set only after the store confirms the write.
    pub async fn submit_vote(&self) -> Result<()> {
        let now = self.inner.clock.now();
        let (kind, payload) = {
            let state = self.inner.read_state()?;
            let poll = state
                .poll()
                .ok_or_else(|| voting_error!("Poll {} has not loaded", self.inner.poll_id))?;
            if poll.is_closed_at(now) {
                return Err(Error::PollClosed {
                    poll_id: poll.id.clone(),
                });
            }
            if !state.can_submit(now) {
                return Err(voting_error!(
                    "Ballot for {} poll {} is incomplete",
                    poll.kind,
                    poll.id
                ));
            }
            (poll.kind, state.editor().payload())
        };

        let fields = document::encode_ballot(kind, &payload, now);
        if let Err(e) = self
            .inner
            .store
            .write(&self.inner.own_vote_path(), fields, WriteMode::Replace)
            .await
        {
            tracing::warn!("Vote submission for poll {} failed: {}", self.inner.poll_id, e);
            return Err(e);
        }

        tracing::info!(
            "Vote submitted: poll={}, voter={}, entries={}",
            self.inner.poll_id,
            self.inner.viewer_id,
            payload.len()
        );

        self.inner.write_state()?.set_has_voted(true);
        self.inner.refresh();
        Ok(())
    }

    /// Add an option as a guest
    ///
    /// Allowed only while the poll is open and accepts guest options. The
    /// new option is ranked after the current last one.
    pub async fn add_guest_option(&self, text: &str) -> Result<OptionId> {
        let now = self.inner.clock.now();
        let text = text.trim();

        let rank = {
            let state = self.inner.read_state()?;
            let poll = state
                .poll()
                .ok_or_else(|| voting_error!("Poll {} has not loaded", self.inner.poll_id))?;
            if poll.is_closed_at(now) {
                return Err(Error::PollClosed {
                    poll_id: poll.id.clone(),
                });
            }
            if !poll.accepts_guest_options_at(now) {
                return Err(Error::GuestOptionsDisabled {
                    poll_id: poll.id.clone(),
                });
            }
            state.options().iter().map(|o| o.rank).max().map_or(0, |r| r + 1)
        };

        if text.is_empty() {
            return Err(Error::validation("option text"));
        }
        if text.chars().count() > self.inner.config.max_option_length {
            return Err(Error::validation("option text length"));
        }

        let option = PollOption {
            id: Uuid::new_v4().to_string(),
            text: text.to_string(),
            rank,
            created_by: self.inner.viewer_id.clone(),
            created_at: now,
        };
        let path = self.inner.options_path().child(&option.id);
        self.inner
            .store
            .write(&path, document::encode_option(&option), WriteMode::Replace)
            .await?;

        tracing::info!(
            "Guest option added: poll={}, option={}, rank={}",
            self.inner.poll_id,
            option.id,
            option.rank
        );
        Ok(option.id)
    }

    /// Lock or unlock the poll; creator only. Returns the new lock state.
    pub async fn toggle_lock(&self) -> Result<bool> {
        let locked = {
            let state = self.inner.read_state()?;
            let poll = state
                .poll()
                .ok_or_else(|| voting_error!("Poll {} has not loaded", self.inner.poll_id))?;
            if !poll.is_creator(&self.inner.viewer_id) {
                return Err(Error::NotCreator);
            }
            !poll.is_locked
        };

        let mut fields = Document::new();
        fields.insert(FIELD_IS_LOCKED.into(), json!(locked));
        self.inner
            .store
            .write(&self.inner.poll_path(), fields, WriteMode::Merge)
            .await?;

        tracing::info!("Poll {} lock set to {}", self.inner.poll_id, locked);
        Ok(locked)
    }

    /// Stop all deliveries
    pub fn close(self) {
        tracing::debug!("Closing poll session {}", self.inner.poll_id);
        self.inner.detach_all();
    }
}

impl Drop for PollSession {
    fn drop(&mut self) {
        self.inner.detach_all();
    }
}
