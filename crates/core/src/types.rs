use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unit in which a usage type is rated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UsageUnit {
    #[serde(rename = "Compute*Month")]
    ComputeMonth,
    #[serde(rename = "IP*Month")]
    IpMonth,
    #[serde(rename = "GB")]
    Gb,
    #[serde(rename = "GB*Month")]
    GbMonth,
    #[serde(rename = "Policy*Month")]
    PolicyMonth,
    #[serde(rename = "Bytes")]
    Bytes,
    #[serde(rename = "IOPS")]
    Iops,
}

impl UsageUnit {
    pub fn description(self) -> &'static str {
        match self {
            Self::ComputeMonth => "Compute*Month",
            Self::IpMonth => "IP*Month",
            Self::Gb => "GB",
            Self::GbMonth => "GB*Month",
            Self::PolicyMonth => "Policy*Month",
            Self::Bytes => "Bytes",
            Self::Iops => "IOPS",
        }
    }

    /// Tariffs in these units are priced per month and charged per hour of use.
    pub fn is_monthly_rate(self) -> bool {
        matches!(
            self,
            Self::ComputeMonth | Self::IpMonth | Self::PolicyMonth | Self::GbMonth
        )
    }
}

impl std::fmt::Display for UsageUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Metered resource types, keyed by the platform's numeric usage codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UsageType {
    RunningVm,
    AllocatedVm,
    IpAddress,
    NetworkBytesSent,
    NetworkBytesReceived,
    Volume,
    Template,
    Iso,
    Snapshot,
    SecurityGroup,
    LoadBalancerPolicy,
    PortForwardingRule,
    NetworkOffering,
    VpnUsers,
    VmDiskIoRead,
    VmDiskIoWrite,
    VmDiskBytesRead,
    VmDiskBytesWrite,
    VmSnapshot,
    VolumeSecondary,
    VmSnapshotOnPrimary,
    Backup,
    Bucket,
    Network,
    Vpc,
    BackupObject,
}

impl UsageType {
    pub const ALL: [UsageType; 26] = [
        Self::RunningVm,
        Self::AllocatedVm,
        Self::IpAddress,
        Self::NetworkBytesSent,
        Self::NetworkBytesReceived,
        Self::Volume,
        Self::Template,
        Self::Iso,
        Self::Snapshot,
        Self::SecurityGroup,
        Self::LoadBalancerPolicy,
        Self::PortForwardingRule,
        Self::NetworkOffering,
        Self::VpnUsers,
        Self::VmDiskIoRead,
        Self::VmDiskIoWrite,
        Self::VmDiskBytesRead,
        Self::VmDiskBytesWrite,
        Self::VmSnapshot,
        Self::VolumeSecondary,
        Self::VmSnapshotOnPrimary,
        Self::Backup,
        Self::Bucket,
        Self::Network,
        Self::Vpc,
        Self::BackupObject,
    ];

    pub fn code(self) -> i32 {
        match self {
            Self::RunningVm => 1,
            Self::AllocatedVm => 2,
            Self::IpAddress => 3,
            Self::NetworkBytesSent => 4,
            Self::NetworkBytesReceived => 5,
            Self::Volume => 6,
            Self::Template => 7,
            Self::Iso => 8,
            Self::Snapshot => 9,
            Self::SecurityGroup => 10,
            Self::LoadBalancerPolicy => 11,
            Self::PortForwardingRule => 12,
            Self::NetworkOffering => 13,
            Self::VpnUsers => 14,
            Self::VmDiskIoRead => 21,
            Self::VmDiskIoWrite => 22,
            Self::VmDiskBytesRead => 23,
            Self::VmDiskBytesWrite => 24,
            Self::VmSnapshot => 25,
            Self::VolumeSecondary => 26,
            Self::VmSnapshotOnPrimary => 27,
            Self::Backup => 28,
            Self::Bucket => 29,
            Self::Network => 30,
            Self::Vpc => 31,
            Self::BackupObject => 32,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    /// Looks a type up by its quota name, ignoring case.
    pub fn from_quota_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.quota_name().eq_ignore_ascii_case(name.trim()))
    }

    /// Upper-case name exposed to activation rules as `resourceType`.
    pub fn quota_name(self) -> &'static str {
        match self {
            Self::RunningVm => "RUNNING_VM",
            Self::AllocatedVm => "ALLOCATED_VM",
            Self::IpAddress => "IP_ADDRESS",
            Self::NetworkBytesSent => "NETWORK_BYTES_SENT",
            Self::NetworkBytesReceived => "NETWORK_BYTES_RECEIVED",
            Self::Volume => "VOLUME",
            Self::Template => "TEMPLATE",
            Self::Iso => "ISO",
            Self::Snapshot => "SNAPSHOT",
            Self::SecurityGroup => "SECURITY_GROUP",
            Self::LoadBalancerPolicy => "LOAD_BALANCER_POLICY",
            Self::PortForwardingRule => "PORT_FORWARDING_RULE",
            Self::NetworkOffering => "NETWORK_OFFERING",
            Self::VpnUsers => "VPN_USERS",
            Self::VmDiskIoRead => "VM_DISK_IO_READ",
            Self::VmDiskIoWrite => "VM_DISK_IO_WRITE",
            Self::VmDiskBytesRead => "VM_DISK_BYTES_READ",
            Self::VmDiskBytesWrite => "VM_DISK_BYTES_WRITE",
            Self::VmSnapshot => "VM_SNAPSHOT",
            Self::VolumeSecondary => "VOLUME_SECONDARY",
            Self::VmSnapshotOnPrimary => "VM_SNAPSHOT_ON_PRIMARY",
            Self::Backup => "BACKUP",
            Self::Bucket => "BUCKET",
            Self::Network => "NETWORK",
            Self::Vpc => "VPC",
            Self::BackupObject => "BACKUP_OBJECT",
        }
    }

    pub fn unit(self) -> UsageUnit {
        match self {
            Self::RunningVm | Self::AllocatedVm | Self::Network | Self::Vpc => {
                UsageUnit::ComputeMonth
            }
            Self::IpAddress => UsageUnit::IpMonth,
            Self::NetworkBytesSent | Self::NetworkBytesReceived => UsageUnit::Gb,
            Self::Volume
            | Self::Template
            | Self::Iso
            | Self::Snapshot
            | Self::VmSnapshot
            | Self::VolumeSecondary
            | Self::VmSnapshotOnPrimary
            | Self::Backup
            | Self::Bucket
            | Self::BackupObject => UsageUnit::GbMonth,
            Self::SecurityGroup
            | Self::LoadBalancerPolicy
            | Self::PortForwardingRule
            | Self::NetworkOffering
            | Self::VpnUsers => UsageUnit::PolicyMonth,
            Self::VmDiskIoRead | Self::VmDiskIoWrite => UsageUnit::Iops,
            Self::VmDiskBytesRead | Self::VmDiskBytesWrite => UsageUnit::Bytes,
        }
    }

    pub fn discriminator(self) -> &'static str {
        match self {
            Self::RunningVm => "Running Vm Usage",
            Self::AllocatedVm => "Allocated Vm Usage",
            Self::IpAddress => "IP Address Usage",
            Self::NetworkBytesSent => "Network Usage (Bytes Sent)",
            Self::NetworkBytesReceived => "Network Usage (Bytes Received)",
            Self::Volume => "Volume Usage",
            Self::Template => "Template Usage",
            Self::Iso => "ISO Usage",
            Self::Snapshot => "Snapshot Usage",
            Self::SecurityGroup => "Security Group Usage",
            Self::LoadBalancerPolicy => "Load Balancer Usage",
            Self::PortForwardingRule => "Port Forwarding Usage",
            Self::NetworkOffering => "Network Offering Usage",
            Self::VpnUsers => "VPN users usage",
            Self::VmDiskIoRead => "VM Disk usage(I/O Read)",
            Self::VmDiskIoWrite => "VM Disk usage(I/O Write)",
            Self::VmDiskBytesRead => "VM Disk usage(Bytes Read)",
            Self::VmDiskBytesWrite => "VM Disk usage(Bytes Write)",
            Self::VmSnapshot => "VM Snapshot storage usage",
            Self::VolumeSecondary => "Volume on secondary storage usage",
            Self::VmSnapshotOnPrimary => "VM Snapshot on primary storage usage",
            Self::Backup => "Backup storage usage",
            Self::Bucket => "Object Store bucket usage",
            Self::Network => "Network usage",
            Self::Vpc => "VPC usage",
            Self::BackupObject => "Backup object usage",
        }
    }
}

impl std::fmt::Display for UsageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.quota_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AccountType {
    Normal,
    Admin,
    DomainAdmin,
    ResourceDomainAdmin,
    ReadOnlyAdmin,
    Project,
}

impl AccountType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Admin => "Admin",
            Self::DomainAdmin => "DomainAdmin",
            Self::ResourceDomainAdmin => "ResourceDomainAdmin",
            Self::ReadOnlyAdmin => "ReadOnlyAdmin",
            Self::Project => "Project",
        }
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An owner of metered resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: u64,
    pub uuid: Uuid,
    pub name: String,
    pub account_type: AccountType,
    pub domain_id: u64,
    /// Accounts with quota disabled have their usage marked processed without rating.
    #[serde(default = "default_quota_enabled")]
    pub quota_enabled: bool,
}

fn default_quota_enabled() -> bool {
    true
}

impl Account {
    pub fn new(id: u64, name: impl Into<String>, account_type: AccountType, domain_id: u64) -> Self {
        Self {
            id,
            uuid: Uuid::new_v4(),
            name: name.into(),
            account_type,
            domain_id,
            quota_enabled: true,
        }
    }
}

impl std::fmt::Display for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{\"id\":{},\"uuid\":\"{}\",\"accountName\":\"{}\",\"domainId\":{}}}",
            self.id, self.uuid, self.name, self.domain_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip_through_catalogue() {
        for usage_type in UsageType::ALL {
            assert_eq!(UsageType::from_code(usage_type.code()), Some(usage_type));
        }
        assert_eq!(UsageType::from_code(0), None);
        assert_eq!(UsageType::from_code(15), None);
        assert_eq!(UsageType::from_quota_name("running_vm"), Some(UsageType::RunningVm));
        assert_eq!(UsageType::from_quota_name("GPU"), None);
    }

    #[test]
    fn test_backup_object_metadata() {
        let t = UsageType::BackupObject;
        assert_eq!(t.code(), 32);
        assert_eq!(t.quota_name(), "BACKUP_OBJECT");
        assert_eq!(t.unit(), UsageUnit::GbMonth);
        assert_eq!(t.unit().to_string(), "GB*Month");
    }

    #[test]
    fn test_account_type_names() {
        assert_eq!(AccountType::DomainAdmin.to_string(), "DomainAdmin");
        assert_eq!(serde_json::to_string(&AccountType::ReadOnlyAdmin).unwrap(), "\"ReadOnlyAdmin\"");
    }
}
