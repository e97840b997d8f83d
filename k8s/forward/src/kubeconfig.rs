use crate::error::{
    Error, KubeClientSnafu, KubeConfigNotFoundSnafu, KubeConfigReadSnafu, KubeConfigSnafu,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use snafu::{OptionExt, ResultExt};
use std::{
    env,
    path::{Path, PathBuf},
};

/// Everything needed to reach the kubernetes api-server: the kubeconfig file and,
/// optionally, which of its contexts to use.
#[derive(Debug, Clone, Default)]
pub struct ConnectionDescriptor {
    kube_config: Option<PathBuf>,
    context: Option<String>,
}

impl ConnectionDescriptor {
    /// Return a new `Self` for the given kubeconfig file.
    /// If None, `KUBECONFIG` is used, then the default location in the home directory.
    pub fn new(kube_config: Option<PathBuf>) -> Self {
        Self {
            kube_config,
            context: None,
        }
    }
    /// Move self with the following kubeconfig context.
    /// If None, the current-context of the kubeconfig is used.
    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    /// Get the kubeconfig file path.
    pub fn kube_config_path(&self) -> Result<PathBuf, Error> {
        kube_config_path(
            self.kube_config.clone(),
            env::var(utils::KUBECONFIG_ENV).ok(),
            home_dir(),
        )
        .context(KubeConfigNotFoundSnafu)
    }

    /// Get the `kube::Config` from the kubeconfig file.
    pub async fn config(&self) -> Result<kube::Config, Error> {
        let path = self.kube_config_path()?;
        tracing::debug!(path = %path.display(), context = ?self.context, "Loading kubeconfig");

        let kube_config = Kubeconfig::read_from(&path).context(KubeConfigReadSnafu { path })?;
        let options = KubeConfigOptions {
            context: self.context.clone(),
            ..Default::default()
        };
        kube::Config::from_custom_kubeconfig(kube_config, &options)
            .await
            .context(KubeConfigSnafu)
    }

    /// Get a `kube::Client` authenticated with the kubeconfig credentials.
    pub async fn client(&self) -> Result<kube::Client, Error> {
        let config = self.config().await?;
        let client = kube::Client::try_from(config).context(KubeClientSnafu)?;
        tracing::debug!("Connected to Kubernetes API");
        Ok(client)
    }
}

fn home_dir() -> Option<String> {
    #[cfg(not(target_os = "windows"))]
    let home = env::var("HOME");
    #[cfg(target_os = "windows")]
    let home = env::var("USERPROFILE");
    home.ok()
}

/// Pick the kubeconfig file: the explicit path, else the env variable, else the default
/// location within the home directory, if it exists.
fn kube_config_path(
    explicit: Option<PathBuf>,
    env_path: Option<String>,
    home: Option<String>,
) -> Option<PathBuf> {
    if explicit.is_some() {
        return explicit;
    }
    if let Some(env_path) = env_path.filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(env_path));
    }
    let default_path = Path::new(&home?).join(utils::DEFAULT_KUBECONFIG_PATH);
    match default_path.exists() {
        true => Some(default_path),
        false => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins() {
        let path = kube_config_path(
            Some(PathBuf::from("/etc/kube.yaml")),
            Some("/tmp/env.yaml".to_string()),
            None,
        );
        assert_eq!(path, Some(PathBuf::from("/etc/kube.yaml")));
    }

    #[test]
    fn env_before_home() {
        let path = kube_config_path(None, Some("/tmp/env.yaml".to_string()), None);
        assert_eq!(path, Some(PathBuf::from("/tmp/env.yaml")));

        let path = kube_config_path(None, Some(String::new()), None);
        assert_eq!(path, None);
    }

    #[test]
    fn missing_default() {
        let home = "/this/home/does/not/exist".to_string();
        assert_eq!(kube_config_path(None, None, Some(home)), None);
    }

    #[tokio::test]
    async fn unreadable_kubeconfig() {
        let descriptor =
            ConnectionDescriptor::new(Some(PathBuf::from("/this/kubeconfig/does/not/exist")));
        let error = descriptor.config().await.expect_err("file does not exist");
        assert!(matches!(error, Error::KubeConfigRead { .. }), "{error}");
    }
}
