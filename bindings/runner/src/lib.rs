mod bin_path;
mod docker;
mod local_engine;
mod nvidia;

pub mod prelude {
    pub use crate::bin_path::{DOCKER_PATH_ENV, NVIDIA_SMI_PATH_ENV};
    pub use crate::docker::DockerCli;
    pub use crate::local_engine::LocalCommandEngine;
    pub use crate::nvidia::NvidiaSmi;
}
