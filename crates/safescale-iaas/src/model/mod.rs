mod catalog;
mod host;
mod ip;
mod network;
mod property;

pub use catalog::{HostSize, HostTemplate, Image, SizingRequirements};
pub use host::{
    Host, HostDescription, HostLocalMount, HostMounts, HostNetwork, HostProperties,
    HostRemoteMount, HostShare, HostShares, HostSizing, HostState, HostVolume, HostVolumes,
};
pub use ip::{FloatingIP, VirtualIP};
pub use network::{
    Network, NetworkHosts, NetworkProperties, NetworkSubnets, SINGLE_HOST_NETWORK_CIDR,
    SINGLE_HOST_NETWORK_NAME, Subnet, SubnetGateways, SubnetState, parse_private_cidr,
};
pub use property::Property;
