use crate::history::History;
use crate::storage::{STEP_MAP, STEP_MAP_PENDING, Storage};
use anyhow::{Context, Result};
use stepwise::v1::{StepMap, StepMapState, StepMapUpdate};
use tracing::debug;

/// Persisted step map of one project (a submodule has its own).
#[derive(Debug, Clone)]
pub struct StepMapStore {
    storage: Storage,
}

impl StepMapStore {
    pub fn new(storage: Storage) -> Self {
        StepMapStore { storage }
    }

    /// Start tracking with every current step mapped to itself.
    ///
    /// A `pending` map is being built for a rewrite that has not finished;
    /// readers in other processes ignore it until [`StepMapStore::commit`].
    pub fn initialize(&self, history: &History, pending: bool) -> Result<StepMap> {
        let map = StepMap::identity(
            history
                .step_commits()?
                .into_iter()
                .map(|c| c.descriptor.number),
        );
        self.save(&map)?;

        if pending {
            self.storage.set_item(STEP_MAP_PENDING, "true")?;
        } else {
            self.storage.remove_item(STEP_MAP_PENDING)?;
        }

        debug!(steps = map.len(), pending, "initialized step map");
        Ok(map)
    }

    pub fn state(&self) -> StepMapState {
        if !self.storage.has_item(STEP_MAP) {
            StepMapState::Absent
        } else if self.storage.has_item(STEP_MAP_PENDING) {
            StepMapState::Pending
        } else {
            StepMapState::Committed
        }
    }

    /// The tracked map whatever its state.
    pub fn load(&self) -> Result<Option<StepMap>> {
        let Some(content) = self.storage.get_item(STEP_MAP)? else {
            return Ok(None);
        };
        let map = serde_json::from_str(&content).context("failed to parse step map")?;
        Ok(Some(map))
    }

    /// The tracked map, only once it is committed.
    pub fn load_committed(&self) -> Result<Option<StepMap>> {
        match self.state() {
            StepMapState::Committed => self.load(),
            _ => Ok(None),
        }
    }

    /// Record a change. Returns `false` when no map is tracked.
    pub fn update(&self, update: &StepMapUpdate) -> Result<bool> {
        let Some(mut map) = self.load()? else {
            return Ok(false);
        };
        map.apply(update);
        self.save(&map)?;
        debug!(?update, "updated step map");
        Ok(true)
    }

    /// Promote a pending map.
    pub fn commit(&self) -> Result<()> {
        self.storage.remove_item(STEP_MAP_PENDING)
    }

    pub fn dispose(&self) -> Result<()> {
        self.storage.remove_item(STEP_MAP)?;
        self.storage.remove_item(STEP_MAP_PENDING)
    }

    fn save(&self, map: &StepMap) -> Result<()> {
        let content = serde_json::to_string(map).context("failed to serialize step map")?;
        self.storage.set_item(STEP_MAP, &content)
    }
}
