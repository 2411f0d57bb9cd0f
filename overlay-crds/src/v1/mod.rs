pub mod cluster_network;
pub mod host_subnet;
