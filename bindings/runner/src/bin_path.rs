use anyhow::bail;
use anyhow::Context;
use docbench_runner::prelude::DocbenchResult;
use std::env;
use std::path::PathBuf;

/// Environment variable to override the path to the `docker` binary used to run containers.
pub const DOCKER_PATH_ENV: &str = "DOCBENCH_DOCKER_PATH";

/// Environment variable to override the path to the `nvidia-smi` binary used to list GPUs.
pub const NVIDIA_SMI_PATH_ENV: &str = "DOCBENCH_NVIDIA_SMI_PATH";

/// Find the binary called `name`.
///
/// If `env_var` is set, its value is used as the path to the binary. Otherwise the binary is
/// looked up in the user's `PATH`.
pub(crate) fn binary_path(name: &str, env_var: &str) -> DocbenchResult<PathBuf> {
    match env::var(env_var).ok().as_deref() {
        Some("") => {
            bail!("'{env_var}' set to empty string");
        }
        Some(value) if value == name => which_binary(name, env_var),
        None => which_binary(name, env_var),
        Some(path) => {
            let bin_path = PathBuf::from(path);
            if !bin_path.exists() {
                bail!(
                    "Path to {name} overwritten with '{env_var}={path}' but that path doesn't exist",
                    path = bin_path.display()
                );
            }
            Ok(bin_path)
        }
    }
}

fn which_binary(name: &str, env_var: &str) -> DocbenchResult<PathBuf> {
    log::debug!("'{env_var}' is not a path so looking for {name} in user's 'PATH'");
    which::which(name).with_context(|| {
        format!("{name} not found in PATH. Please install it or set '{env_var}' to the correct path.")
    })
}

#[cfg(test)]
mod tests {
    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt as _;

    use serial_test::serial;
    use tempfile::{NamedTempFile, TempDir};

    use super::*;

    #[test]
    #[serial]
    fn missing_override_is_an_error() {
        env::set_var(DOCKER_PATH_ENV, "/non/existent/path/to/docker");
        let result = binary_path("docker", DOCKER_PATH_ENV);
        env::remove_var(DOCKER_PATH_ENV);
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn empty_override_is_an_error() {
        env::set_var(DOCKER_PATH_ENV, "");
        let result = binary_path("docker", DOCKER_PATH_ENV);
        env::remove_var(DOCKER_PATH_ENV);
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn override_is_used() {
        let temp = NamedTempFile::new().expect("failed to create temp file");
        let test_path = temp.path().to_str().expect("failed to get temp file path");
        env::set_var(DOCKER_PATH_ENV, test_path);
        let result = binary_path("docker", DOCKER_PATH_ENV);
        env::remove_var(DOCKER_PATH_ENV);
        assert_eq!(result.unwrap(), PathBuf::from(test_path));
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn binary_is_found_in_path() {
        let temp = TempDir::new().expect("failed to create temp dir");
        let docker_file_path = temp.path().join("docker");
        std::fs::write(&docker_file_path, "#!/bin/sh\n").expect("failed to create docker file");
        let mut perms = std::fs::metadata(&docker_file_path)
            .unwrap()
            .permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&docker_file_path, perms).unwrap();

        let old_path = env::var_os("PATH");
        env::set_var("PATH", temp.path());
        env::remove_var(DOCKER_PATH_ENV);

        let result = binary_path("docker", DOCKER_PATH_ENV);
        if let Some(old_path) = old_path {
            env::set_var("PATH", old_path);
        }
        assert_eq!(result.unwrap(), docker_file_path);
    }

    #[test]
    #[serial]
    fn binary_not_in_path_is_an_error() {
        let old_path = env::var_os("PATH");
        env::remove_var("PATH");
        env::remove_var(NVIDIA_SMI_PATH_ENV);

        let result = binary_path("nvidia-smi", NVIDIA_SMI_PATH_ENV);
        if let Some(old_path) = old_path {
            env::set_var("PATH", old_path);
        }
        assert!(result.is_err());
    }
}
