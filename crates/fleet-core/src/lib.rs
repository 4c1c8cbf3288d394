pub mod action;
pub mod command;
pub mod config;
pub mod error;
pub mod io;
pub mod paths;
pub mod provider;
pub mod store;
pub mod types;

pub use action::{Action, AgentAction, LatencyClass, MeshAction, PackageAction, VolumeAction};
pub use command::{Encoded, Operation, Parameters};
pub use error::{FleetError, Result};
pub use provider::{Inventory, SettingsProvider};
pub use store::ResourceDb;
pub use types::{Agent, AgentStatus, OperationState, Resource, ResourceKey, ResourceState};
