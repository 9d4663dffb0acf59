//! Pod federation: friendship between video pods and propagation of
//! their catalogs, with payloads moved through a swarm transfer.

pub mod catalog;
pub mod config;
pub mod convergence;
pub mod error;
pub mod http;
pub mod peers;
pub mod pod;
pub mod propagation;
pub mod store;
pub mod swarm;
pub mod transport;
pub mod types;
pub mod video;

pub use error::{PodError, Result};
pub use pod::{Pod, PodSettings};
pub use types::{PodUrl, Propagation, VideoId};
pub use video::{NewVideo, VideoRecord};
