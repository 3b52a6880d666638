//! AWS EBS operations for the migration controller.
//!
//! The Kubernetes view of volume attachment is eventually consistent: a PV
//! can report released while EC2 still shows the volume attached to a node.
//! Migration therefore treats EC2 as the authority and waits for the volume
//! itself to reach `available` before re-binding it in the destination
//! cluster.

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;
use tokio::time::MissedTickBehavior;

/// Default interval between volume state polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default maximum time to wait for detachment.
pub const DEFAULT_DETACH_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Errors surfaced by EBS operations.
#[derive(Error, Debug)]
pub enum EbsError {
    /// DescribeVolumes call failed.
    #[error("failed to describe volume {volume_id}: {message}")]
    Describe { volume_id: String, message: String },

    /// EC2 returned an empty result for the volume ID.
    #[error("volume {0} not found")]
    NotFound(String),

    /// The volume entered the `error` state.
    #[error("volume {0} is in error state")]
    ErrorState(String),

    /// The volume is being deleted or already gone.
    #[error("volume {0} is being deleted or already deleted")]
    VolumeGone(String),

    /// The volume did not become available before the deadline.
    #[error("timeout waiting for volume {volume_id} to detach (waited {timeout:?})")]
    DetachTimeout { volume_id: String, timeout: Duration },
}

impl EbsError {
    /// Transport and server-side describe failures are retryable by the
    /// reconcile framework; terminal volume states are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EbsError::Describe { .. })
    }
}

/// State of an EBS volume as reported by EC2.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VolumeState {
    Creating,
    Available,
    InUse,
    Deleting,
    Deleted,
    Error,
    /// A state this crate does not model; carries the raw wire value.
    Other(String),
}

impl VolumeState {
    fn from_sdk(state: &aws_sdk_ec2::types::VolumeState) -> Self {
        match state.as_str() {
            "creating" => VolumeState::Creating,
            "available" => VolumeState::Available,
            "in-use" => VolumeState::InUse,
            "deleting" => VolumeState::Deleting,
            "deleted" => VolumeState::Deleted,
            "error" => VolumeState::Error,
            other => VolumeState::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for VolumeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeState::Creating => write!(f, "creating"),
            VolumeState::Available => write!(f, "available"),
            VolumeState::InUse => write!(f, "in-use"),
            VolumeState::Deleting => write!(f, "deleting"),
            VolumeState::Deleted => write!(f, "deleted"),
            VolumeState::Error => write!(f, "error"),
            VolumeState::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Information about an EBS volume.
#[derive(Clone, Debug)]
pub struct VolumeInfo {
    /// EBS volume ID.
    pub volume_id: String,
    /// Current state of the volume.
    pub state: VolumeState,
    /// Availability zone where the volume resides.
    pub availability_zone: String,
    /// Volume size in GiB.
    pub size_gib: i32,
    /// EBS volume type (gp2, gp3, io1, ...).
    pub volume_type: Option<String>,
    /// Current attachments, empty once detached.
    pub attachments: Vec<VolumeAttachment>,
    /// Volume tags.
    pub tags: BTreeMap<String, String>,
}

/// One attachment of a volume to an EC2 instance.
#[derive(Clone, Debug)]
pub struct VolumeAttachment {
    /// EC2 instance the volume is attached to.
    pub instance_id: String,
    /// Device name (e.g. /dev/xvda).
    pub device: String,
    /// Attachment state (attaching, attached, detaching, detached).
    pub state: String,
}

/// Options for [`EbsClient::wait_for_available`].
pub struct WaitOptions<'a> {
    /// How often to poll the volume state.
    pub poll_interval: Duration,
    /// Maximum time to wait.
    pub timeout: Duration,
    /// Invoked synchronously after each poll that did not terminate the wait.
    pub on_poll: Option<&'a (dyn Fn(&VolumeInfo) + Send + Sync)>,
}

impl Default for WaitOptions<'_> {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_DETACH_TIMEOUT,
            on_poll: None,
        }
    }
}

/// Client for EBS volume operations.
#[derive(Clone)]
pub struct EbsClient {
    inner: aws_sdk_ec2::Client,
}

impl EbsClient {
    /// Create a client from a loaded AWS SDK config.
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            inner: aws_sdk_ec2::Client::new(config),
        }
    }

    /// Retrieve information about an EBS volume.
    pub async fn volume_info(&self, volume_id: &str) -> Result<VolumeInfo, EbsError> {
        let resp = self
            .inner
            .describe_volumes()
            .volume_ids(volume_id)
            .send()
            .await
            .map_err(|e| EbsError::Describe {
                volume_id: volume_id.to_string(),
                message: e.to_string(),
            })?;

        let vol = resp
            .volumes()
            .first()
            .ok_or_else(|| EbsError::NotFound(volume_id.to_string()))?;

        let attachments = vol
            .attachments()
            .iter()
            .map(|att| VolumeAttachment {
                instance_id: att.instance_id().unwrap_or_default().to_string(),
                device: att.device().unwrap_or_default().to_string(),
                state: att
                    .state()
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_default(),
            })
            .collect();

        let tags = vol
            .tags()
            .iter()
            .filter_map(|t| Some((t.key()?.to_string(), t.value()?.to_string())))
            .collect();

        Ok(VolumeInfo {
            volume_id: vol.volume_id().unwrap_or(volume_id).to_string(),
            state: vol
                .state()
                .map(VolumeState::from_sdk)
                .unwrap_or(VolumeState::Other(String::new())),
            availability_zone: vol.availability_zone().unwrap_or_default().to_string(),
            size_gib: vol.size().unwrap_or_default(),
            volume_type: vol.volume_type().map(|t| t.as_str().to_string()),
            attachments,
            tags,
        })
    }

    /// Check whether a volume is in the `available` (detached) state.
    pub async fn is_available(&self, volume_id: &str) -> Result<bool, EbsError> {
        let info = self.volume_info(volume_id).await?;
        Ok(info.state == VolumeState::Available)
    }

    /// Block until the volume is detached and available.
    ///
    /// An immediate read happens before the ticker is armed so a volume that
    /// is already available returns without waiting one interval. Terminal
    /// states surface as distinct errors rather than timing out.
    pub async fn wait_for_available(
        &self,
        volume_id: &str,
        opts: WaitOptions<'_>,
    ) -> Result<(), EbsError> {
        let deadline = tokio::time::Instant::now() + opts.timeout;

        let info = self.volume_info(volume_id).await?;
        if info.state == VolumeState::Available {
            return Ok(());
        }
        if let Some(on_poll) = opts.on_poll {
            on_poll(&info);
        }
        self.check_terminal_state(volume_id, &info.state)?;

        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);
        let mut ticker = tokio::time::interval(opts.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // interval fires immediately on the first tick; the initial read
        // above already covered that slot
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut sleep => {
                    return Err(EbsError::DetachTimeout {
                        volume_id: volume_id.to_string(),
                        timeout: opts.timeout,
                    });
                }
                _ = ticker.tick() => {
                    let info = self.volume_info(volume_id).await?;
                    if let Some(on_poll) = opts.on_poll {
                        on_poll(&info);
                    }
                    if info.state == VolumeState::Available {
                        return Ok(());
                    }
                    self.check_terminal_state(volume_id, &info.state)?;
                    // still attached or detaching, keep waiting
                }
            }
        }
    }

    fn check_terminal_state(&self, volume_id: &str, state: &VolumeState) -> Result<(), EbsError> {
        match state {
            VolumeState::Error => Err(EbsError::ErrorState(volume_id.to_string())),
            VolumeState::Deleting | VolumeState::Deleted => {
                Err(EbsError::VolumeGone(volume_id.to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Extract the EBS volume ID from the formats a PV can carry:
/// `vol-0123456789abcdef0` or `aws://us-east-1a/vol-0123456789abcdef0`.
pub fn volume_id_from_handle(handle: &str) -> &str {
    match handle.rfind('/') {
        Some(idx) => &handle[idx + 1..],
        None => handle,
    }
}
