//! Static template and image catalog of the sandbox.

use safescale_iaas::{HostTemplate, Image};

const IMAGES: &[(&str, &str)] = &[
    ("img-ubuntu-2004", "Ubuntu 20.04"),
    ("img-ubuntu-2204", "Ubuntu 22.04"),
    ("img-debian-12", "Debian 12"),
    ("img-rocky-9", "Rocky Linux 9"),
];

fn template(
    name: &str,
    cores: u32,
    ram_size: f32,
    disk_size: u32,
    gpu_number: u32,
    gpu_type: &str,
    cpu_freq: f32,
) -> HostTemplate {
    HostTemplate {
        id: format!("tpl-{}", name),
        name: name.to_string(),
        cores,
        ram_size,
        disk_size,
        gpu_number,
        gpu_type: gpu_type.to_string(),
        cpu_freq,
    }
}

pub fn templates() -> Vec<HostTemplate> {
    vec![
        template("s1.tiny", 1, 1.0, 10, 0, "", 2.0),
        template("s1.small", 1, 2.0, 20, 0, "", 2.4),
        template("s2.medium", 2, 4.0, 40, 0, "", 2.4),
        template("s4.large", 4, 8.0, 80, 0, "", 2.8),
        template("s8.xlarge", 8, 32.0, 160, 0, "", 3.0),
        template("g4.large", 4, 16.0, 100, 1, "T4", 2.6),
        template("g8.xlarge", 8, 64.0, 200, 2, "A100", 3.2),
    ]
}

pub fn images() -> Vec<Image> {
    IMAGES
        .iter()
        .map(|(id, name)| Image {
            id: id.to_string(),
            name: name.to_string(),
        })
        .collect()
}

/// Looks up an image by exact ID, then by case-insensitive name prefix.
/// Ties resolve to the latest release (greatest name).
pub fn find_image(os_name: &str) -> Option<Image> {
    let all = images();
    if let Some(image) = all.iter().find(|i| i.id == os_name) {
        return Some(image.clone());
    }

    let wanted = os_name.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    all.into_iter()
        .filter(|i| i.name.to_lowercase().starts_with(&wanted))
        .max_by(|a, b| a.name.cmp(&b.name))
}
