//! Domain entities

pub mod build;
pub mod container;

pub use build::{Build, BuildStatus, BoundedLog, LogSeverity};
pub use container::{
    BasicAuth, Container, ContainerKind, ContainerStatus, ContainerType, DeploymentType,
    TagMatchType, VolumeMount,
};
