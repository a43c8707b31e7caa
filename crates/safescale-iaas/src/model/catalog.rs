//! Provider catalog entries (templates, images) and sizing requirements.

use serde::{Deserialize, Serialize};

/// Minimal envelope a host template must satisfy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SizingRequirements {
    pub min_cores: u32,
    /// GB
    pub min_ram_size: f32,
    /// GB
    pub min_disk_size: u32,
    pub min_gpu: u32,
    /// GHz
    pub min_cpu_freq: f32,
}

impl SizingRequirements {
    /// Tells if `template` satisfies every requirement. With `relaxed`, the
    /// GPU and CPU frequency constraints are ignored.
    pub fn is_satisfied_by(&self, template: &HostTemplate, relaxed: bool) -> bool {
        let base = template.cores >= self.min_cores
            && template.ram_size >= self.min_ram_size
            && (self.min_disk_size == 0 || template.disk_size >= self.min_disk_size);
        if relaxed {
            return base;
        }
        base && template.gpu_number >= self.min_gpu && template.cpu_freq >= self.min_cpu_freq
    }

    /// True when every dimension of `self` is strictly below `recorded`.
    pub fn is_strictly_below(&self, recorded: &HostSize) -> bool {
        self.min_cores < recorded.cores
            && self.min_ram_size < recorded.ram_size
            && self.min_disk_size < recorded.disk_size
            && self.min_gpu < recorded.gpu_number
            && self.min_cpu_freq < recorded.cpu_freq
    }
}

impl From<SizingRequirements> for HostSize {
    fn from(req: SizingRequirements) -> Self {
        HostSize {
            cores: req.min_cores,
            ram_size: req.min_ram_size,
            disk_size: req.min_disk_size,
            gpu_number: req.min_gpu,
            cpu_freq: req.min_cpu_freq,
        }
    }
}

/// Sizing of a host, either requested or effective.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HostSize {
    pub cores: u32,
    pub ram_size: f32,
    pub disk_size: u32,
    pub gpu_number: u32,
    pub cpu_freq: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostTemplate {
    pub id: String,
    pub name: String,
    pub cores: u32,
    pub ram_size: f32,
    pub disk_size: u32,
    pub gpu_number: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gpu_type: String,
    pub cpu_freq: f32,
}

impl HostTemplate {
    pub fn size(&self) -> HostSize {
        HostSize {
            cores: self.cores,
            ram_size: self.ram_size,
            disk_size: self.disk_size,
            gpu_number: self.gpu_number,
            cpu_freq: self.cpu_freq,
        }
    }
}

impl std::fmt::Display for HostTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "'{}' ({} core{}",
            self.name,
            self.cores,
            if self.cores == 1 { "" } else { "s" }
        )?;
        if self.cpu_freq > 0.0 {
            write!(f, " at {:.1} GHz", self.cpu_freq)?;
        }
        write!(f, ", {:.1} GB RAM, {} GB disk", self.ram_size, self.disk_size)?;
        if self.gpu_number > 0 {
            write!(
                f,
                ", {} GPU{}",
                self.gpu_number,
                if self.gpu_number == 1 { "" } else { "s" }
            )?;
            if !self.gpu_type.is_empty() {
                write!(f, " {}", self.gpu_type)?;
            }
        }
        write!(f, ")")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub name: String,
}
