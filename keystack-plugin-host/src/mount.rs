//! Global mount manager.
//!
//! Owns the per-store placement table. A plugin is mounted at every
//! placement its contract declares: straight into an empty cell, or into the
//! multiplexing adapter already occupying the cell. All table mutation goes
//! through [`GlobalMounts::mount`] and [`GlobalMounts::unmount`].

use crate::error::MountError;
use crate::placement::Placement;
use crate::plugin::PluginHandle;
use keystack_types::PluginId;
use tracing::{debug, info, warn};

pub struct GlobalMounts {
    slots: [Option<PluginHandle>; Placement::COUNT],
    atomic: bool,
}

impl GlobalMounts {
    /// With `atomic`, a failed mount unbinds the stages it had already
    /// bound. Without it, those stages stay bound.
    pub fn new(atomic: bool) -> Self {
        Self {
            slots: Default::default(),
            atomic,
        }
    }

    pub fn is_atomic(&self) -> bool {
        self.atomic
    }

    /// Direct occupant of `placement`.
    pub fn occupant(&self, placement: Placement) -> Option<&PluginHandle> {
        self.slots[placement.index()].as_ref()
    }

    /// Occupied cells as `(placement, plugin id)`, in placement order.
    pub fn snapshot(&self) -> Vec<(Placement, PluginId)> {
        Placement::ALL
            .into_iter()
            .filter_map(|placement| self.occupant(placement).map(|p| (placement, p.id())))
            .collect()
    }

    // ================================================================
    // Mount / Unmount
    // ================================================================

    pub fn mount(&mut self, plugin: &PluginHandle) -> Result<(), MountError> {
        let declared = declared_placements(plugin)?;
        let mut bound = Vec::new();

        for name in declared.split_whitespace() {
            let result = name
                .parse::<Placement>()
                .map_err(MountError::from)
                .and_then(|placement| self.bind(plugin, placement).map(|()| placement));

            match result {
                Ok(placement) => bound.push(placement),
                Err(err) => {
                    if self.atomic {
                        for placement in bound.iter().rev() {
                            if let Err(undo) = self.unbind(plugin, *placement) {
                                warn!(plugin = %plugin.name(), %placement, error = %undo, "could not undo partial mount");
                            }
                        }
                    } else if !bound.is_empty() {
                        warn!(plugin = %plugin.name(), bound = bound.len(), "mount failed, earlier placements stay bound");
                    }
                    return Err(err);
                }
            }
        }

        info!(plugin = %plugin.name(), placements = %declared, "plugin mounted");
        Ok(())
    }

    /// Unmounts `plugin` from every declared placement. Inconsistent
    /// placements are logged and skipped; the first one is reported once all
    /// placements were visited. An unknown placement name aborts.
    pub fn unmount(&mut self, plugin: &PluginHandle) -> Result<(), MountError> {
        let declared = declared_placements(plugin)?;
        let mut first_failure = None;

        for name in declared.split_whitespace() {
            let placement: Placement = name.parse()?;
            if let Err(err) = self.unbind(plugin, placement) {
                warn!(plugin = %plugin.name(), %placement, error = %err, "unmount inconsistent, continuing");
                first_failure.get_or_insert(err);
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => {
                info!(plugin = %plugin.name(), "plugin unmounted");
                Ok(())
            }
        }
    }

    fn bind(&mut self, plugin: &PluginHandle, placement: Placement) -> Result<(), MountError> {
        let cell = &mut self.slots[placement.index()];
        let Some(occupant) = cell.as_ref() else {
            *cell = Some(plugin.clone());
            debug!(plugin = %plugin.name(), %placement, "bound as direct occupant");
            return Ok(());
        };

        let conflict = || MountError::SlotConflict {
            placement,
            occupant: occupant.name().to_string(),
        };
        if occupant.id() == plugin.id() {
            return Err(conflict());
        }

        let mut guard = occupant.lock();
        let Some(adapter) = guard.as_multiplexer() else {
            return Err(conflict());
        };
        let already_listed = adapter
            .entries()
            .iter()
            .any(|entry| entry.plugin_id == plugin.id() && entry.placement == placement);
        if already_listed {
            return Err(conflict());
        }
        adapter.add_plugin(plugin.clone(), placement)?;
        debug!(plugin = %plugin.name(), adapter = %occupant.name(), %placement, "bound through adapter");
        Ok(())
    }

    fn unbind(&mut self, plugin: &PluginHandle, placement: Placement) -> Result<(), MountError> {
        let cell = &mut self.slots[placement.index()];
        let not_mounted = || MountError::NotMounted {
            plugin: plugin.name().to_string(),
            placement,
        };
        let Some(occupant) = cell.as_ref() else {
            return Err(not_mounted());
        };

        if occupant.id() == plugin.id() {
            *cell = None;
            debug!(plugin = %plugin.name(), %placement, "direct occupant cleared");
            return Ok(());
        }

        let mut guard = occupant.lock();
        match guard.as_multiplexer() {
            Some(adapter) => {
                adapter.remove_plugin(plugin.id())?;
                Ok(())
            }
            None => Err(not_mounted()),
        }
    }
}

impl Default for GlobalMounts {
    fn default() -> Self {
        Self::new(true)
    }
}

fn declared_placements(plugin: &PluginHandle) -> Result<String, MountError> {
    plugin
        .contract()
        .placements()
        .map(str::to_string)
        .ok_or_else(|| MountError::MissingPlacements(plugin.name().to_string()))
}
