//! Round-robin scheduling.

use crate::{EnvId, EnvStatus, Kernel, KernelError};
use log::{debug, trace};

impl Kernel {
    /// Give the CPU to the next runnable environment.
    ///
    /// Slots are scanned circularly starting after the current one. If none
    /// is runnable the current environment keeps the CPU, provided it is
    /// still running; otherwise the CPU goes idle.
    pub fn yield_cpu(&mut self) -> Option<EnvId> {
        let slots = self.envs.capacity();
        let start = self.current.map_or(0, |c| c.index() + 1);

        let next = (0..slots)
            .filter_map(|k| self.envs.slot((start + k) % slots))
            .find(|e| e.status == EnvStatus::Runnable)
            .map(|e| e.id);
        if let Some(id) = next
            && self.run(id).is_ok()
        {
            return Some(id);
        }

        if let Some(cur) = self.current
            && self.envs.get(cur).is_some_and(|e| e.status == EnvStatus::Running)
        {
            trace!("[{cur}] keeps the CPU");
            return Some(cur);
        }

        debug!("no runnable environments, idle");
        self.current = None;
        None
    }

    /// Context switch to `id`.
    ///
    /// # Errors
    /// - [`KernelError::BadEnvironment`] if `id` is not live.
    pub fn run(&mut self, id: EnvId) -> Result<(), KernelError> {
        self.live(id)?;
        if let Some(prev) = self.current
            && prev != id
            && let Some(env) = self.envs.get_mut(prev)
            && env.status == EnvStatus::Running
        {
            env.status = EnvStatus::Runnable;
        }

        let env = self.live_mut(id)?;
        env.status = EnvStatus::Running;
        env.runs += 1;
        self.current = Some(id);
        trace!("[{id}] running");
        Ok(())
    }

    /// Make `id` eligible for scheduling.
    ///
    /// # Errors
    /// - [`KernelError::BadEnvironment`] if `id` is not live.
    pub fn mark_runnable(&mut self, id: EnvId) -> Result<(), KernelError> {
        self.live_mut(id)?.status = EnvStatus::Runnable;
        Ok(())
    }
}
