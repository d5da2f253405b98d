// Client creation with custom user-agent support for kube 2.x
use crate::error::Result as KrResult;
use hyper::http::{HeaderName, HeaderValue};
use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use tracing::{info, warn};

/// Environment variable that overrides the user agent sent to the API server
pub const USER_AGENT_ENV: &str = "KUBERELAY_USER_AGENT";

/// Add a user-agent header to `config`, preferring `KUBERELAY_USER_AGENT` when set
///
/// Invalid header values are logged and the kube default is kept.
pub fn add_user_agent_header(config: &mut Config, custom_user_agent: Option<&str>) {
    let from_env = std::env::var(USER_AGENT_ENV).ok();
    let Some(user_agent) = from_env.as_deref().or(custom_user_agent) else {
        return;
    };

    match HeaderValue::from_str(user_agent) {
        Ok(header_value) => config
            .headers
            .push((HeaderName::from_static("user-agent"), header_value)),
        Err(e) => warn!("⚠️  Ignoring invalid user agent {:?}: {}", user_agent, e),
    }
}

/// Load cluster configuration, from a named kubeconfig context if given
///
/// # Errors
///
/// Will return `Err` if no usable kubeconfig or in-cluster configuration is found
pub async fn load_config(context: Option<&str>) -> KrResult<Config> {
    let config = match context {
        Some(context) => {
            info!("📄 Loading kubeconfig context {}", context);
            Config::from_kubeconfig(&KubeConfigOptions {
                context: Some(context.to_string()),
                ..KubeConfigOptions::default()
            })
            .await?
        }
        None => Config::infer().await?,
    };
    Ok(config)
}

/// Create a new k8s client to interact with k8s cluster api
///
/// # Errors
///
/// Will return `Err` if the configuration cannot be loaded or the client cannot be built
pub async fn new(custom_user_agent: Option<&str>, context: Option<&str>) -> KrResult<Client> {
    let mut config = load_config(context).await?;
    add_user_agent_header(&mut config, custom_user_agent);
    let client = Client::try_from(config)?;
    Ok(client)
}

/// Confirm the API server is reachable, returning its version
///
/// # Errors
///
/// Will return `Err` if the API server cannot be reached or rejects the credentials
pub async fn probe(client: &Client) -> KrResult<String> {
    let info = client.apiserver_version().await?;
    Ok(info.git_version)
}
