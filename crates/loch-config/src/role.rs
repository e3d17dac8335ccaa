//! Master/worker role detection.
//!
//! A deployment environment name containing `master` or `worker` overrides
//! the statically configured scheduling and queue flags.

use tracing::info;

use crate::Settings;

/// Environment variable carrying the deployment environment name.
pub const ROLE_ENV: &str = "LOCH_ENVIRONMENT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Worker,
}

impl Role {
    /// Detect a role from an environment name such as `loch-prod-worker`.
    pub fn detect(signal: Option<&str>) -> Option<Role> {
        let signal = signal?;
        if signal.contains("worker") {
            Some(Role::Worker)
        } else if signal.contains("master") {
            Some(Role::Master)
        } else {
            None
        }
    }

    pub fn from_env() -> Option<Role> {
        Self::detect(std::env::var(ROLE_ENV).ok().as_deref())
    }
}

impl Settings {
    /// Apply a detected role. Masters schedule and never self-queue; workers
    /// only react to dispatches. Without a role the static flags stand.
    pub fn apply_role(&mut self, role: Option<Role>) {
        let scheduling = match role {
            Some(Role::Worker) => false,
            Some(Role::Master) => {
                if self.queue.enabled {
                    info!("Changing queue enabled to false");
                    self.queue.enabled = false;
                }
                true
            }
            None => return,
        };
        if scheduling != self.scheduling.enabled {
            info!(enabled = scheduling, "Changing scheduling enabled config");
            self.scheduling.enabled = scheduling;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_role() {
        assert_eq!(Role::detect(Some("loch-prod-worker")), Some(Role::Worker));
        assert_eq!(Role::detect(Some("loch-prod-master")), Some(Role::Master));
        assert_eq!(Role::detect(Some("loch-dev")), None);
        assert_eq!(Role::detect(None), None);
    }

    #[test]
    fn test_master_disables_queue() {
        let mut settings = Settings::default();
        settings.scheduling.enabled = false;
        settings.queue.enabled = true;

        settings.apply_role(Some(Role::Master));
        assert!(settings.scheduling.enabled);
        assert!(!settings.queue.enabled);
    }

    #[test]
    fn test_worker_disables_scheduling() {
        let mut settings = Settings::default();
        settings.queue.enabled = true;

        settings.apply_role(Some(Role::Worker));
        assert!(!settings.scheduling.enabled);
        assert!(settings.queue.enabled);
    }

    #[test]
    fn test_no_role_keeps_static_config() {
        let mut settings = Settings::default();
        settings.scheduling.enabled = false;
        settings.queue.enabled = true;

        settings.apply_role(None);
        assert!(!settings.scheduling.enabled);
        assert!(settings.queue.enabled);
    }
}
