use std::path::PathBuf;

use clap::Parser;

use crate::dispatcher::OrchestrationMode;
use crate::k8s::KubernetesConfig;

/// Command-line flags for the controller.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "controller",
    version = crate::version::VERSION,
    about = "Edge controller control plane"
)]
pub struct Flags {
    /// Persistence data source name (currently `memory://`).
    #[arg(long, env = "CONTROLLER_DSN")]
    pub dsn: String,

    /// Admin user password; must be non-empty.
    #[arg(long = "admin-pass", env = "CONTROLLER_ADMIN_PASS")]
    pub admin_pass: String,

    /// Log filter, e.g. `info` or `controller=debug`.
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,

    /// Controller HTTP port.
    #[arg(long = "http-port", default_value_t = 8080)]
    pub http_port: u16,

    /// Controller gRPC port (TLS front end).
    #[arg(long = "grpc-port", default_value_t = 8081)]
    pub grpc_port: u16,

    /// Port the node agent's network (ELA) services historically
    /// listened on; commands now multiplex over the control stream.
    #[arg(long = "ela-port", default_value_t = 42101)]
    pub ela_port: u16,

    /// Port the node agent's application (EVA) services historically
    /// listened on; commands now multiplex over the control stream.
    #[arg(long = "eva-port", default_value_t = 42102)]
    pub eva_port: u16,

    /// Orchestration mode: native, kubernetes, or kubernetes-ovn.
    #[arg(long = "orchestration-mode", default_value = "native")]
    pub orchestration_mode: String,

    /// Kubernetes root certificate path.
    #[arg(long = "k8s-client-ca-path")]
    pub k8s_client_ca_path: Option<PathBuf>,

    /// Kubernetes client certificate path.
    #[arg(long = "k8s-client-cert-path")]
    pub k8s_client_cert_path: Option<PathBuf>,

    /// Kubernetes client private key path.
    #[arg(long = "k8s-client-key-path")]
    pub k8s_client_key_path: Option<PathBuf>,

    /// Kubernetes master host, e.g. `https://master:6443`.
    #[arg(long = "k8s-master-host", default_value = "")]
    pub k8s_master_host: String,

    /// Kubernetes API path prefix.
    #[arg(long = "k8s-api-path", default_value = "")]
    pub k8s_api_path: String,

    /// Kubernetes default user.
    #[arg(long = "k8s-master-user", default_value = "")]
    pub k8s_master_user: String,
}

impl Flags {
    /// Validate flag combinations and resolve the orchestration mode.
    pub fn validate(&self) -> anyhow::Result<OrchestrationMode> {
        if self.admin_pass.is_empty() {
            anyhow::bail!("admin password cannot be empty");
        }
        if self.dsn.is_empty() {
            anyhow::bail!("persistence DSN cannot be empty");
        }
        self.orchestration_mode.parse()
    }

    /// Kubernetes client configuration assembled from flags.
    pub fn kubernetes(&self) -> KubernetesConfig {
        KubernetesConfig {
            host: self.k8s_master_host.clone(),
            api_path: self.k8s_api_path.clone(),
            ca_path: self.k8s_client_ca_path.clone(),
            cert_path: self.k8s_client_cert_path.clone(),
            key_path: self.k8s_client_key_path.clone(),
            username: self.k8s_master_user.clone(),
        }
    }
}
