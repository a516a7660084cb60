//! Finite state machine for deployment status

use serde::{Deserialize, Serialize};

/// Deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    /// Clone and build in progress
    Building,

    /// Build succeeded; publishing or live
    Running,

    /// Superseded by a newer deployment, or stopped by the owner
    Stopped,

    /// A stage failed
    Failed,

    /// Canceled by the caller before the pipeline completed
    Canceled,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Building => "building",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Stopped => "stopped",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Canceled => "canceled",
        }
    }

    /// No further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Stopped | DeploymentStatus::Failed | DeploymentStatus::Canceled
        )
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Build output is ready, publishing starts
    BuildSucceeded,

    /// Artifacts uploaded and routing updated
    Published,

    /// A newer deployment of the same site went live
    Superseded,

    /// The owner took the deployment offline
    Stop,

    /// A stage failed
    Fail(String),

    /// The cancellation token fired
    Cancel,
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentStatus,
    error: Option<String>,
}

impl DeploymentFsm {
    /// Create a new FSM in building state
    pub fn new() -> Self {
        Self::from_state(DeploymentStatus::Building)
    }

    /// Resume from a persisted status
    pub fn from_state(state: DeploymentStatus) -> Self {
        Self { state, error: None }
    }

    /// Get current state
    pub fn state(&self) -> DeploymentStatus {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<DeploymentStatus, String> {
        use DeploymentStatus::*;

        let new_state = match (&self.state, &event) {
            (Building, DeploymentEvent::BuildSucceeded) => Running,
            (Running, DeploymentEvent::Published) => Running,
            (Running, DeploymentEvent::Superseded) | (Running, DeploymentEvent::Stop) => Stopped,
            (Building, DeploymentEvent::Fail(err)) | (Running, DeploymentEvent::Fail(err)) => {
                self.error = Some(err.clone());
                Failed
            }
            (Building, DeploymentEvent::Cancel) | (Running, DeploymentEvent::Cancel) => Canceled,

            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(new_state)
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
