use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use overlay_crds::v1::cluster_network::DEFAULT_CLUSTER_NETWORK;
use overlay_k8s_utils::RetryPolicy;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand, Debug)]
pub enum Commands {
    /// Run the subnet master
    Controller(ControllerArgs),
    /// Print the CRD manifests as YAML
    Crdgen,
}

#[derive(Parser, Debug, Clone)]
pub struct ControllerArgs {
    /// ClusterNetwork object holding the network configuration
    #[arg(long, env = "CLUSTER_NETWORK_NAME", default_value = DEFAULT_CLUSTER_NETWORK)]
    pub cluster_network_name: String,

    /// ClusterNetwork spec as YAML, read instead of the API object
    #[arg(long, env = "TOPOLOGY_FILE")]
    pub topology_file: Option<PathBuf>,

    /// Host interface excluded from the host network check
    #[arg(long = "skip-interface", default_values = ["tun0", "vxlan_sys_4789"])]
    pub skip_interfaces: Vec<String>,

    /// Attempts for a HostSubnet update that keeps hitting conflicts
    #[arg(long, default_value_t = 5)]
    pub conflict_retry_attempts: u32,

    /// First backoff between conflicting updates, in milliseconds
    #[arg(long, default_value_t = 10)]
    pub conflict_retry_initial_ms: u64,

    /// Apply the HostSubnet and ClusterNetwork CRDs before starting
    #[arg(long, env = "APPLY_CRDS", default_value_t = true, action = clap::ArgAction::Set)]
    pub apply_crds: bool,

    /// Seconds to wait for the node cache to fill
    #[arg(long, default_value_t = 30)]
    pub store_timeout_secs: u64,
}

impl ControllerArgs {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.conflict_retry_attempts,
            Duration::from_millis(self.conflict_retry_initial_ms),
        )
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller_args(args: &[&str]) -> ControllerArgs {
        let cli = Cli::try_parse_from(["overlay-master", "controller"].iter().chain(args))
            .expect("cli");
        match cli.command {
            Commands::Controller(args) => args,
            Commands::Crdgen => panic!("expected controller"),
        }
    }

    #[test]
    fn test_controller_defaults() {
        let args = controller_args(&[]);
        assert_eq!(args.cluster_network_name, "default");
        assert_eq!(args.topology_file, None);
        assert_eq!(args.skip_interfaces, vec!["tun0", "vxlan_sys_4789"]);
        assert_eq!(args.retry_policy().max_attempts, 5);
        assert_eq!(args.retry_policy().initial_interval, Duration::from_millis(10));
        assert_eq!(args.store_timeout(), Duration::from_secs(30));
        assert!(args.apply_crds);
    }

    #[test]
    fn test_crd_apply_can_be_disabled() {
        let args = controller_args(&["--apply-crds", "false"]);
        assert!(!args.apply_crds);
    }

    #[test]
    fn test_repeated_skip_interface() {
        let args = controller_args(&["--skip-interface", "eth9", "--skip-interface", "tun0"]);
        assert_eq!(args.skip_interfaces, vec!["eth9", "tun0"]);
    }

    #[test]
    fn test_crdgen_subcommand() {
        let cli = Cli::try_parse_from(["overlay-master", "crdgen"]).expect("cli");
        assert!(matches!(cli.command, Commands::Crdgen));
    }
}
