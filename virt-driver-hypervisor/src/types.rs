//! Types crossing the `Hypervisor` boundary.

use serde::{Deserialize, Serialize};

/// Transport used to mount a host directory into the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountTransport {
    /// Plan 9 filesystem protocol over virtio.
    NineP,
    /// virtio-fs, substitutable for 9p when the backend supports it.
    VirtioFs,
}

impl Default for MountTransport {
    fn default() -> Self {
        MountTransport::NineP
    }
}

/// One of the three scheduler-provided directories mounted read-only into
/// the guest: shared alloc, task-local, task-secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountSpec {
    /// Stable tag (`allocDir`, `localDir`, `secretsDir`).
    pub tag: String,
    /// Host-side source path.
    pub source: String,
    /// Guest-side destination path.
    pub dest: String,
    /// Transport to use for this mount.
    pub transport: MountTransport,
    /// Always true for the scheduler-provided mounts; kept for completeness.
    pub read_only: bool,
}

impl MountSpec {
    pub fn new(tag: impl Into<String>, source: impl Into<String>, dest: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            source: source.into(),
            dest: dest.into(),
            transport: MountTransport::default(),
            read_only: true,
        }
    }

    pub fn with_transport(mut self, transport: MountTransport) -> Self {
        self.transport = transport;
        self
    }

    /// The two boot commands the mount construction rule emits per mount.
    pub fn boot_commands(&self) -> Vec<String> {
        let transport = match self.transport {
            MountTransport::NineP => "9p",
            MountTransport::VirtioFs => "virtiofs",
        };
        let opts = match self.transport {
            MountTransport::NineP => " -o trans=virtio",
            MountTransport::VirtioFs => "",
        };
        vec![
            format!("mkdir -p {}", self.dest),
            format!(
                "mountpoint -q {dest} || mount -t {transport}{opts} {tag} {dest}",
                dest = self.dest,
                transport = transport,
                opts = opts,
                tag = self.tag,
            ),
        ]
    }
}

/// A single disk attached to the domain: either a plain image or a freshly
/// created copy-on-write overlay (see `image` module).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskSpec {
    pub path: String,
    pub format: String,
}

impl DiskSpec {
    pub fn new(path: impl Into<String>, format: impl Into<String>) -> Self {
        Self { path: path.into(), format: format.into() }
    }
}

/// A single guest network interface. Multi-interface guests are a
/// non-goal; a domain carries at most one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NicSpec {
    pub bridge: String,
    pub hw_addr: Option<String>,
}

/// A small file injected into the guest boot environment: the env-var file
/// and the authorized_keys file (see `virt-driver::cloudinit`; cloud-init
/// content generation beyond this is out of scope).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestFile {
    pub dest: String,
    pub contents: String,
}

/// Inputs to `Hypervisor::create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    pub name: String,
    pub memory_mib: u64,
    pub vcpus: u32,
    pub cpuset: Option<String>,
    pub disk: DiskSpec,
    pub mounts: Vec<MountSpec>,
    pub nics: Vec<NicSpec>,
    pub extra_files: Vec<GuestFile>,
    pub cloud_init_user_data: Option<String>,
    pub boot_commands: Vec<String>,
}

impl DomainConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            memory_mib: 512,
            vcpus: 1,
            cpuset: None,
            disk: DiskSpec::new("", "qcow2"),
            mounts: Vec::new(),
            nics: Vec::new(),
            extra_files: Vec::new(),
            cloud_init_user_data: None,
            boot_commands: Vec::new(),
        }
    }

    pub fn with_memory_mib(mut self, memory_mib: u64) -> Self {
        self.memory_mib = memory_mib;
        self
    }

    pub fn with_vcpus(mut self, vcpus: u32) -> Self {
        self.vcpus = vcpus;
        self
    }

    pub fn with_cpuset(mut self, cpuset: impl Into<String>) -> Self {
        self.cpuset = Some(cpuset.into());
        self
    }

    pub fn with_disk(mut self, disk: DiskSpec) -> Self {
        self.disk = disk;
        self
    }

    pub fn with_mount(mut self, mount: MountSpec) -> Self {
        self.mounts.push(mount);
        self
    }

    pub fn with_nic(mut self, nic: NicSpec) -> Self {
        self.nics.push(nic);
        self
    }
}

/// Domain state as reported by `GetDomain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainState {
    Running,
    Shutdown,
    ShutOff,
    Crashed,
    /// Any other backend-reported state string.
    Unknown(String),
}

impl std::fmt::Display for DomainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DomainState::Running => write!(f, "running"),
            DomainState::Shutdown => write!(f, "shutdown"),
            DomainState::ShutOff => write!(f, "shutoff"),
            DomainState::Crashed => write!(f, "crashed"),
            DomainState::Unknown(s) => write!(f, "unknown({s})"),
        }
    }
}

/// `{state, memory, maxMemory, cpuTime, vcpus}` projection returned by
/// `GetDomain`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainInfo {
    pub state: DomainState,
    pub memory_bytes: u64,
    pub max_memory_bytes: u64,
    pub cpu_time_ns: u64,
    pub vcpus: u32,
}

/// `{backendVersion, emulatorVersion, runningCount, inactiveCount}` returned
/// by `GetInfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInfo {
    pub backend_version: String,
    pub emulator_version: String,
    pub running_count: u32,
    pub inactive_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_boot_commands_9p() {
        let mount = MountSpec::new("allocDir", "/var/lib/virt-driver/alloc/x", "/alloc");
        let cmds = mount.boot_commands();
        assert_eq!(cmds[0], "mkdir -p /alloc");
        assert_eq!(
            cmds[1],
            "mountpoint -q /alloc || mount -t 9p -o trans=virtio allocDir /alloc"
        );
    }

    #[test]
    fn mount_boot_commands_virtiofs() {
        let mount = MountSpec::new("localDir", "/src", "/local")
            .with_transport(MountTransport::VirtioFs);
        let cmds = mount.boot_commands();
        assert_eq!(
            cmds[1],
            "mountpoint -q /local || mount -t virtiofs localDir /local"
        );
    }
}
