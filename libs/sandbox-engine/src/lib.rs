//! Sandboxed compile-and-run engine.
//!
//! A request flows through [`ExecutionPipeline`]: the source is written to a
//! host workspace, one isolated container is provisioned with that workspace
//! mounted, the program is compiled once and then run once per input. The
//! isolation primitive sits behind [`ContainerBackend`]; production uses
//! [`DockerBackend`].

pub mod backend;
pub mod docker;
pub mod error;
pub mod language;
pub mod pipeline;
pub mod provisioner;
pub mod runner;
pub mod workspace;

#[cfg(any(test, feature = "fake-backend"))]
pub mod fake;


pub use backend::{ContainerBackend, ContainerSpec, OutputChunk, OutputStream};
pub use docker::DockerBackend;
pub use error::SandboxError;
pub use language::{LanguageProfile, LanguageRegistry};
pub use pipeline::{ExecutionPipeline, PipelineStage};
pub use provisioner::{Environment, EnvironmentGuard, EnvironmentProvisioner};
pub use runner::{CommandOutput, CommandRunner};
pub use workspace::Workspace;
