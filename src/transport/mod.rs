use async_trait::async_trait;

use crate::error::Result;
use crate::types::{JoinRequest, JoinResponse, LeaveRequest, PodUrl, Propagation};

pub mod local;
pub use local::LocalMesh;

/// Calls one pod makes on another.
///
/// Every method targets a single pod and either reaches it or fails; retry
/// policy belongs to the caller.
#[async_trait]
pub trait PodClient: Send + Sync {
    /// Ask `target` to accept us as a friend.
    async fn join(&self, target: &PodUrl, request: &JoinRequest) -> Result<JoinResponse>;

    /// Tell `target` that a new pod joined through one of its friends.
    async fn announce(&self, target: &PodUrl, request: &JoinRequest) -> Result<()>;

    /// Tell `target` we are no longer its friend.
    async fn leave(&self, target: &PodUrl, request: &LeaveRequest) -> Result<()>;

    /// Deliver a catalog write to `target`.
    async fn propagate(&self, target: &PodUrl, message: &Propagation) -> Result<()>;
}
